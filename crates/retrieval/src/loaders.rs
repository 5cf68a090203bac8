//! Plain-text document loading for the retrieval engine.
//!
//! Text and markdown load directly. Binary formats (PDF, DOCX) belong
//! to external serializer collaborators; files we cannot read are
//! skipped with a warning instead of failing the batch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A loaded (or chunked) piece of text with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub page: Option<usize>,
}

/// Extensions accepted into an index.
pub const LOADABLE_EXT: [&str; 2] = ["txt", "md"];

fn is_loadable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| LOADABLE_EXT.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load documents from the given paths, skipping what cannot be read.
pub fn load_docs(paths: &[PathBuf]) -> Vec<Document> {
    let mut docs = Vec::new();
    for path in paths {
        if !path.exists() || !is_loadable(path) {
            tracing::warn!(path = %path.display(), "skipping unloadable document");
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => docs.push(Document {
                text,
                source: path.display().to_string(),
                page: None,
            }),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
            }
        }
    }
    docs
}

/// Recursively list loadable files under a root, sorted for stable
/// stamp computation.
pub fn list_corpus_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    collect(root, &mut out);
    out.sort();
    out
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
        } else if is_loadable(&path) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_text_and_skips_binary_ext() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("a.txt");
        let pdf = dir.path().join("b.pdf");
        std::fs::write(&txt, "hello docs").unwrap();
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();

        let docs = load_docs(&[txt.clone(), pdf]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "hello docs");
        assert_eq!(docs[0].source, txt.display().to_string());
    }

    #[test]
    fn empty_files_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.md");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(load_docs(&[empty]).is_empty());
    }

    #[test]
    fn corpus_listing_is_recursive_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/z.md"), "z").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("skip.bin"), "b").unwrap();

        let files = list_corpus_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.txt"));
        assert!(files[1].ends_with("sub/z.md"));
    }
}
