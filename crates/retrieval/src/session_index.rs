//! Lazy per-session RAG index over uploaded attachments.
//!
//! The index lives under `sessions/{sid}/rag` and is built the first
//! time a doc attachment is referenced by a rag task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mf_domain::error::{Error, Result};
use mf_domain::result::Citation;
use mf_domain::state::Attachment;

use crate::chunker::chunk_docs;
use crate::loaders::load_docs;
use crate::vector::VectorStore;
use crate::Embedder;

/// One retrieved chunk.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RagMatch {
    pub text: String,
    pub source: String,
    pub page: Option<usize>,
}

/// Result of a session RAG query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RagSearchResult {
    pub query: String,
    pub matches: Vec<RagMatch>,
    #[serde(skip)]
    pub citations: Vec<Citation>,
}

/// Per-session retrieval over uploaded documents.
pub struct SessionRag {
    sessions_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    embedding_model: String,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SessionRag {
    pub fn new(
        sessions_dir: PathBuf,
        embedder: Arc<dyn Embedder>,
        embedding_model: String,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            sessions_dir,
            embedder,
            embedding_model,
            chunk_size,
            chunk_overlap,
        }
    }

    fn rag_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id).join("rag")
    }

    /// Build the index if it does not exist yet. A session with no
    /// loadable attachments simply stays unindexed.
    pub async fn ensure_index(&self, session_id: &str, attachments: &[Attachment]) -> Result<()> {
        let dir = self.rag_dir(session_id);
        if VectorStore::exists(&dir) {
            return Ok(());
        }

        let paths: Vec<PathBuf> = attachments.iter().map(|a| PathBuf::from(&a.path)).collect();
        if paths.is_empty() {
            return Ok(());
        }

        let docs = load_docs(&paths);
        if docs.is_empty() {
            return Ok(());
        }

        let chunks = chunk_docs(&docs, self.chunk_size, self.chunk_overlap);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        let store = VectorStore::from_embedded(chunks, embeddings)?;
        store.save(&dir)?;

        tracing::info!(
            session_id,
            chunks = store.len(),
            model = %self.embedding_model,
            "session RAG index built"
        );
        Ok(())
    }

    /// Query the session index.
    pub async fn search(&self, session_id: &str, query: &str, top_k: usize) -> Result<RagSearchResult> {
        let dir = self.rag_dir(session_id);
        if !VectorStore::exists(&dir) {
            return Err(Error::Index("No session index found".into()));
        }

        let store = VectorStore::load(&dir)?;
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Index("empty query embedding".into()))?;

        let hits = store.search(&query_vec, top_k);
        let mut matches = Vec::new();
        let mut citations = Vec::new();
        for (entry, _score) in hits {
            let title = title_for(&entry.source, entry.page);
            matches.push(RagMatch {
                text: entry.text.clone(),
                source: entry.source.clone(),
                page: entry.page,
            });
            citations.push(Citation {
                title,
                url: entry.source.clone(),
                snippet: Some(entry.text.chars().take(300).collect()),
            });
        }

        Ok(RagSearchResult {
            query: query.to_string(),
            matches,
            citations,
        })
    }
}

/// `basename (p.N)` title used for citations.
pub fn title_for(source: &str, page: Option<usize>) -> String {
    let name = Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    match page {
        Some(p) => format!("{name} (p.{})", p + 1),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::state::ArtifactKind;

    /// Deterministic embedder: counts occurrences of marker words so
    /// related texts land near each other without a network call.
    struct WordEmbedder;

    #[async_trait::async_trait]
    impl Embedder for WordEmbedder {
        async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(input
                .iter()
                .map(|text| {
                    let t = text.to_lowercase();
                    vec![
                        t.matches("rust").count() as f32,
                        t.matches("cooking").count() as f32,
                        1.0,
                    ]
                })
                .collect())
        }
    }

    fn rag(dir: &Path) -> SessionRag {
        SessionRag::new(
            dir.to_path_buf(),
            Arc::new(WordEmbedder),
            "test-embed".into(),
            120,
            20,
        )
    }

    fn doc_attachment(path: &Path) -> Attachment {
        Attachment {
            id: "d1".into(),
            kind: ArtifactKind::Doc,
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            mime: "text/plain".into(),
            path: path.display().to_string(),
        }
    }

    #[tokio::test]
    async fn missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = rag(dir.path()).search("s1", "query", 4).await.unwrap_err();
        assert!(err.to_string().contains("No session index"));
    }

    #[tokio::test]
    async fn builds_once_and_retrieves_relevant_chunk() {
        let data = tempfile::tempdir().unwrap();
        let doc_path = data.path().join("notes.txt");
        std::fs::write(
            &doc_path,
            "rust ownership and borrowing rules\n\ncooking pasta requires salted water",
        )
        .unwrap();

        let sessions = tempfile::tempdir().unwrap();
        let svc = rag(sessions.path());
        let atts = vec![doc_attachment(&doc_path)];

        svc.ensure_index("s1", &atts).await.unwrap();
        // Second call is a no-op against the existing index.
        svc.ensure_index("s1", &atts).await.unwrap();

        let out = svc.search("s1", "rust rust borrowing", 1).await.unwrap();
        assert_eq!(out.matches.len(), 1);
        assert!(out.matches[0].text.contains("rust"));
        assert_eq!(out.citations.len(), 1);
        assert_eq!(out.citations[0].title, "notes.txt");
    }

    #[test]
    fn title_includes_one_based_page() {
        assert_eq!(title_for("/data/report.md", Some(0)), "report.md (p.1)");
        assert_eq!(title_for("/data/report.md", None), "report.md");
    }
}
