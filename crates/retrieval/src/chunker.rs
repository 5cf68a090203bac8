//! Recursive character chunking.
//!
//! Splits on the coarsest separator that yields pieces small enough,
//! then packs pieces into chunks of at most `chunk_size` characters
//! with `chunk_overlap` characters carried between adjacent chunks.

use crate::loaders::Document;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Split one text into chunks.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));
    split_recursive(text, chunk_size, chunk_overlap, 0)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_recursive(text: &str, size: usize, overlap: usize, sep_idx: usize) -> Vec<String> {
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }
    if sep_idx >= SEPARATORS.len() {
        return hard_split(text, size, overlap);
    }

    let sep = SEPARATORS[sep_idx];
    if sep.is_empty() {
        return hard_split(text, size, overlap);
    }

    let pieces: Vec<&str> = text.split(sep).collect();
    if pieces.len() == 1 {
        // Separator absent; try the next finer one.
        return split_recursive(text, size, overlap, sep_idx + 1);
    }

    // Oversized pieces recurse on finer separators before packing.
    let mut units: Vec<String> = Vec::new();
    for piece in pieces {
        if piece.chars().count() > size {
            units.extend(split_recursive(piece, size, overlap, sep_idx + 1));
        } else {
            units.push(piece.to_string());
        }
    }

    pack_units(&units, sep, size, overlap)
}

/// Pack adjacent units into chunks up to `size`, carrying an overlap
/// tail from each emitted chunk into the next when it still fits
/// under the cap.
fn pack_units(units: &[String], sep: &str, size: usize, overlap: usize) -> Vec<String> {
    let sep_len = sep.chars().count();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for unit in units {
        let unit_len = unit.chars().count();
        let joined_len = if current.is_empty() {
            unit_len
        } else {
            current.chars().count() + sep_len + unit_len
        };

        if joined_len <= size {
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(unit);
            continue;
        }

        if !current.is_empty() {
            chunks.push(current.clone());
        }
        let tail: String = current
            .chars()
            .rev()
            .take(overlap)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if !tail.is_empty() && tail.chars().count() + sep_len + unit_len <= size {
            current = format!("{tail}{sep}{unit}");
        } else {
            current = unit.clone();
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Character-window split used when no separator can help.
fn hard_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        out.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

/// Chunk a batch of documents, preserving source and page metadata.
pub fn chunk_docs(docs: &[Document], chunk_size: usize, chunk_overlap: usize) -> Vec<Document> {
    let mut out = Vec::new();
    for doc in docs {
        for chunk in chunk_text(&doc.text, chunk_size, chunk_overlap) {
            out.push(Document {
                text: chunk,
                source: doc.source.clone(),
                page: doc.page,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world", 900, 150);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn chunks_respect_size_cap() {
        let para = "word ".repeat(100);
        let text = format!("{para}\n\n{para}\n\n{para}");
        let chunks = chunk_text(&text, 300, 50);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 300, "chunk over cap: {} chars", c.chars().count());
        }
    }

    #[test]
    fn paragraph_boundaries_preferred() {
        let text = "first paragraph here\n\nsecond paragraph here";
        let chunks = chunk_text(&text, 25, 5);
        assert!(chunks.iter().any(|c| c.contains("first paragraph")));
        assert!(chunks.iter().any(|c| c.contains("second paragraph")));
    }

    #[test]
    fn adjacent_chunks_share_overlap() {
        let text = "abcdefghij".repeat(30);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].chars().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect();
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn unbroken_text_hard_splits() {
        let text = "x".repeat(1000);
        let chunks = chunk_text(&text, 200, 40);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 200);
        }
    }

    #[test]
    fn chunk_docs_keeps_metadata() {
        let docs = vec![Document {
            text: "para one\n\npara two\n\npara three".into(),
            source: "notes.md".into(),
            page: Some(3),
        }];
        let chunks = chunk_docs(&docs, 12, 2);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.source, "notes.md");
            assert_eq!(c.page, Some(3));
        }
    }
}
