//! Flat vector store with cosine ranking and JSON persistence.
//!
//! Vectors are unit-normalized at insert so similarity search is a
//! plain dot product. The store persists as `index.json` inside its
//! index directory.

use std::path::Path;

use serde::{Deserialize, Serialize};

use mf_domain::error::{Error, Result};

use crate::loaders::Document;

const INDEX_FILE: &str = "index.json";

/// One embedded chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub page: Option<usize>,
}

/// An in-memory vector index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    entries: Vec<VectorEntry>,
}

/// Normalize a vector to unit length; zero vectors stay zero.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let mag: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        tracing::warn!(len_a = a.len(), len_b = b.len(), "mismatched vector lengths");
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl VectorStore {
    /// Build a store from chunked documents and their embeddings.
    pub fn from_embedded(docs: Vec<Document>, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        if docs.len() != embeddings.len() {
            return Err(Error::Index(format!(
                "embedding count mismatch: {} docs, {} vectors",
                docs.len(),
                embeddings.len()
            )));
        }
        let entries = docs
            .into_iter()
            .zip(embeddings)
            .map(|(doc, vector)| VectorEntry {
                vector: normalize(&vector),
                text: doc.text,
                source: doc.source,
                page: doc.page,
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k entries by cosine similarity to the query vector.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(&VectorEntry, f32)> {
        let query = normalize(query);
        let mut scored: Vec<(&VectorEntry, f32)> = self
            .entries
            .iter()
            .map(|e| (e, dot(&e.vector, &query)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k.max(1));
        scored
    }

    /// Persist to `<dir>/index.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string(self)?;
        std::fs::write(dir.join(INDEX_FILE), json)?;
        Ok(())
    }

    /// Load from `<dir>/index.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Err(Error::Index(format!("no index at {}", path.display())));
        }
        let raw = std::fs::read_to_string(&path)?;
        let store: VectorStore = serde_json::from_str(&raw)?;
        Ok(store)
    }

    /// Whether a persisted index exists in the directory.
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str, source: &str) -> Document {
        Document {
            text: text.into(),
            source: source.into(),
            page: None,
        }
    }

    #[test]
    fn normalize_unit_length() {
        let n = normalize(&[3.0, 4.0]);
        let mag: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((mag - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_zero_vector_is_identity() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn search_ranks_by_cosine() {
        let docs = vec![doc("east", "a"), doc("north", "b"), doc("northeast", "c")];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let store = VectorStore::from_embedded(docs, vectors).unwrap();

        let hits = store.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.source, "a");
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn mismatched_embedding_count_errors() {
        let err = VectorStore::from_embedded(vec![doc("x", "a")], vec![]).unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::from_embedded(
            vec![doc("hello", "h.txt")],
            vec![vec![0.5, 0.5, 0.0]],
        )
        .unwrap();
        store.save(dir.path()).unwrap();
        assert!(VectorStore::exists(dir.path()));

        let loaded = VectorStore::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        let hits = loaded.search(&[0.5, 0.5, 0.0], 1);
        assert_eq!(hits[0].0.text, "hello");
        assert!((hits[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn load_missing_index_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VectorStore::load(dir.path()).is_err());
        assert!(!VectorStore::exists(dir.path()));
    }
}
