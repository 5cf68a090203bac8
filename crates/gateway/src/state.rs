//! Shared application state passed to all API handlers.

use std::sync::Arc;

use mf_domain::config::Config;
use mf_domain::error::Result;
use mf_lanes::LaneServices;
use mf_providers::{MediaClient, ProviderRegistry};
use mf_retrieval::kb::KbService;
use mf_retrieval::session_index::SessionRag;
use mf_retrieval::Embedder;
use mf_sessions::SessionStore;

use crate::cancel::CancelMap;
use crate::graph::runner::Graph;

/// Embedder backed by the default provider's embeddings endpoint.
/// Clients are built per call so a missing key fails the requesting
/// lane instead of process startup.
struct ProviderEmbedder {
    registry: Arc<ProviderRegistry>,
    model: String,
}

#[async_trait::async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.registry.embedding_client()?;
        client.embeddings(&self.model, input).await
    }
}

/// Media generation backed by the default provider; same lazy-key
/// policy as the embedder.
struct ProviderMedia {
    registry: Arc<ProviderRegistry>,
}

#[async_trait::async_trait]
impl MediaClient for ProviderMedia {
    async fn generate_image(&self, model: &str, prompt: &str, size: &str) -> Result<Vec<u8>> {
        self.registry.media_client()?.generate_image(model, prompt, size).await
    }

    async fn synthesize_speech(&self, model: &str, voice: &str, text: &str) -> Result<Vec<u8>> {
        self.registry.media_client()?.synthesize_speech(model, voice, text).await
    }
}

/// Application state: config plus the long-lived services.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<ProviderRegistry>,
    pub services: Arc<LaneServices>,
    pub graph: Arc<Graph>,
    pub cancel_map: Arc<CancelMap>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(ProviderRegistry::from_env(config.openai_api_key.clone()));

        let embedder: Arc<dyn Embedder> = Arc::new(ProviderEmbedder {
            registry: registry.clone(),
            model: config.models.embedding_model.clone(),
        });
        let session_rag = Arc::new(SessionRag::new(
            config.sessions_dir(),
            embedder.clone(),
            config.models.embedding_model.clone(),
            config.index.chunk_size,
            config.index.chunk_overlap,
        ));
        let kb = Arc::new(KbService::new(
            config.kb_root(),
            config.kb_index_dir(),
            config.kb_stamp_path(),
            config.index.chunk_size,
            config.index.chunk_overlap,
            config.index.cache_ttl,
            embedder,
        ));

        let http = reqwest::Client::builder()
            .timeout(config.pacing.web_timeout)
            .build()
            .map_err(|e| mf_domain::Error::Http(format!("building HTTP client: {e}")))?;

        let services = Arc::new(LaneServices {
            config: config.clone(),
            registry: registry.clone(),
            media: Arc::new(ProviderMedia {
                registry: registry.clone(),
            }),
            session_rag,
            kb,
            http,
            uploads_dir: config.uploads_dir(),
        });

        let graph = Arc::new(crate::graph::build_graph()?);

        Ok(Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            registry,
            services,
            graph,
            cancel_map: Arc::new(CancelMap::new()),
        })
    }
}
