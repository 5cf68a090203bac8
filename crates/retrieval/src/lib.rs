//! Retrieval engine: chunking, the flat vector store, the lazy
//! per-session RAG index, and the knowledge-base index with
//! stamp-based invalidation and query caching.

pub mod chunker;
pub mod kb;
pub mod loaders;
pub mod session_index;
pub mod vector;

use mf_domain::error::Result;

/// Embedding capability the retrieval engine depends on. The gateway
/// adapts the LLM provider behind this; tests plug in deterministic
/// doubles.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>>;
}
