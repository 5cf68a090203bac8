//! Process configuration, read once from the environment at startup.
//!
//! Every knob is optional with a documented default; the only hard
//! requirements (`OPENAI_API_KEY`, `TAVILY_API_KEY`) are enforced lazily
//! by the lanes that need them so a keyless process can still serve
//! text-only turns.

use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-role provider/model overrides. `None` falls back along the
/// documented chain and finally to the request's provider/model.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pub planner_provider: Option<String>,
    pub planner_model: Option<String>,
    pub intent_provider: Option<String>,
    pub intent_model: Option<String>,
    pub text_provider: Option<String>,
    pub text_model: Option<String>,
    pub role_provider: Option<String>,
    pub role_model: Option<String>,
    pub web_support_model: Option<String>,
    pub rag_support_model: Option<String>,
    pub vision_support_model: Option<String>,
}

impl RoutingConfig {
    /// Planner (intent classifier) provider/model: PLANNER_* then
    /// INTENT_* then the request values.
    pub fn planner(&self, provider: &str, model: &str) -> (String, String) {
        let p = self
            .planner_provider
            .clone()
            .or_else(|| self.intent_provider.clone())
            .unwrap_or_else(|| provider.to_string());
        let m = self
            .planner_model
            .clone()
            .or_else(|| self.intent_model.clone())
            .unwrap_or_else(|| model.to_string());
        (p, m)
    }

    /// Synthesizer provider/model: TEXT_* then the request values.
    pub fn text(&self, provider: &str, model: &str) -> (String, String) {
        (
            self.text_provider.clone().unwrap_or_else(|| provider.to_string()),
            self.text_model.clone().unwrap_or_else(|| model.to_string()),
        )
    }

    /// Role-pack provider/model: ROLE_* then the planner chain.
    pub fn role_pack(&self, provider: &str, model: &str) -> (String, String) {
        let (pp, pm) = self.planner(provider, model);
        (
            self.role_provider.clone().unwrap_or(pp),
            self.role_model.clone().unwrap_or(pm),
        )
    }

    /// Support model used to condense one knowledge lane's output.
    pub fn support_model(&self, lane_kind: &str, provider: &str, model: &str) -> (String, String) {
        let (p, default_model) = self.planner(provider, model);
        let m = match lane_kind {
            "web" => self.web_support_model.clone(),
            "rag" | "kb_rag" => self.rag_support_model.clone(),
            "vision" => self.vision_support_model.clone(),
            _ => None,
        };
        (p, m.unwrap_or(default_model))
    }
}

/// Timeouts and stream pacing.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub image_task_timeout: Duration,
    pub image_api_timeout: Duration,
    pub initial_start_delay: Duration,
    pub initial_token_delay: Duration,
    pub meta_stream_token_delay: Duration,
    pub arxiv_stream_token_delay: Duration,
    /// Timeout applied to the external web search APIs.
    pub web_timeout: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            image_task_timeout: Duration::from_secs(90),
            image_api_timeout: Duration::from_secs(90),
            initial_start_delay: Duration::from_millis(0),
            initial_token_delay: Duration::from_millis(24),
            meta_stream_token_delay: Duration::from_millis(0),
            arxiv_stream_token_delay: Duration::from_millis(0),
            web_timeout: Duration::from_secs(12),
        }
    }
}

/// Knowledge-base indexing knobs.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub kb_root_path: Option<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub cache_ttl: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kb_root_path: None,
            chunk_size: 900,
            chunk_overlap: 150,
            cache_ttl: Duration::from_secs(180),
        }
    }
}

/// Fixed models for the media and vision lanes.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub image_model: String,
    pub tts_model: String,
    pub vision_model: String,
    pub embedding_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_model: "gpt-image-1".into(),
            tts_model: "gpt-4o-mini-tts".into(),
            vision_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Config {
    pub routing: RoutingConfig,
    pub pacing: PacingConfig,
    pub index: IndexConfig,
    pub models: ModelConfig,
    pub openai_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    /// Root for uploads/, sessions/, knowledge-base-index/.
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub graph_v2_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            pacing: PacingConfig::default(),
            index: IndexConfig::default(),
            models: ModelConfig::default(),
            openai_api_key: None,
            tavily_api_key: None,
            data_dir: PathBuf::from("data"),
            bind_addr: "0.0.0.0:8000".into(),
            graph_v2_enabled: false,
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_str(name)
        .and_then(|v| v.parse::<f64>().ok())
        .map(|s| Duration::from_secs_f64(s.max(1.0)))
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    env_str(name)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env_str(name)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Read the full configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let pacing_defaults = PacingConfig::default();
        let index_defaults = IndexConfig::default();
        let model_defaults = ModelConfig::default();

        let image_task_timeout =
            env_secs("IMAGE_TASK_TIMEOUT_SEC", pacing_defaults.image_task_timeout);

        Self {
            routing: RoutingConfig {
                planner_provider: env_str("PLANNER_PROVIDER"),
                planner_model: env_str("PLANNER_MODEL"),
                intent_provider: env_str("INTENT_PROVIDER"),
                intent_model: env_str("INTENT_MODEL"),
                text_provider: env_str("TEXT_PROVIDER"),
                text_model: env_str("TEXT_MODEL"),
                role_provider: env_str("ROLE_PROVIDER"),
                role_model: env_str("ROLE_MODEL"),
                web_support_model: env_str("WEB_SUPPORT_MODEL"),
                rag_support_model: env_str("RAG_SUPPORT_MODEL"),
                vision_support_model: env_str("VISION_SUPPORT_MODEL"),
            },
            pacing: PacingConfig {
                image_task_timeout,
                // The HTTP call inherits the task budget unless narrowed.
                image_api_timeout: env_secs("IMAGE_API_TIMEOUT_SEC", image_task_timeout),
                initial_start_delay: env_millis(
                    "INITIAL_START_DELAY_MS",
                    pacing_defaults.initial_start_delay,
                ),
                initial_token_delay: env_millis(
                    "INITIAL_TOKEN_DELAY_MS",
                    pacing_defaults.initial_token_delay,
                ),
                meta_stream_token_delay: env_millis(
                    "META_STREAM_TOKEN_DELAY_MS",
                    pacing_defaults.meta_stream_token_delay,
                ),
                arxiv_stream_token_delay: env_millis(
                    "ARXIV_STREAM_TOKEN_DELAY_MS",
                    pacing_defaults.arxiv_stream_token_delay,
                ),
                web_timeout: pacing_defaults.web_timeout,
            },
            index: IndexConfig {
                kb_root_path: env_str("KB_ROOT_PATH").map(PathBuf::from),
                chunk_size: env_usize("KB_RAG_CHUNK_SIZE", index_defaults.chunk_size),
                chunk_overlap: env_usize("KB_RAG_CHUNK_OVERLAP", index_defaults.chunk_overlap),
                cache_ttl: env_secs("KB_RAG_CACHE_TTL_SEC", index_defaults.cache_ttl),
            },
            models: ModelConfig {
                image_model: env_str("IMAGE_MODEL").unwrap_or(model_defaults.image_model),
                tts_model: env_str("TTS_MODEL").unwrap_or(model_defaults.tts_model),
                vision_model: env_str("VISION_MODEL").unwrap_or(model_defaults.vision_model),
                embedding_model: env_str("EMBEDDING_MODEL").unwrap_or(model_defaults.embedding_model),
            },
            openai_api_key: env_str("OPENAI_API_KEY"),
            tavily_api_key: env_str("TAVILY_API_KEY"),
            data_dir: env_str("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            bind_addr: env_str("BIND_ADDR").unwrap_or(defaults.bind_addr),
            graph_v2_enabled: env_str("GRAPH_V2_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.graph_v2_enabled),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn kb_index_dir(&self) -> PathBuf {
        self.data_dir.join("knowledge-base-index").join("faiss")
    }

    pub fn kb_stamp_path(&self) -> PathBuf {
        self.data_dir.join("knowledge-base-index").join("stamp.json")
    }

    /// Resolve the KB corpus root: explicit override or the first
    /// existing default candidate.
    pub fn kb_root(&self) -> PathBuf {
        if let Some(root) = &self.index.kb_root_path {
            return root.clone();
        }
        let candidates = [
            self.data_dir.join("docs").join("knowledge-base"),
            self.data_dir.join("docs"),
        ];
        for c in &candidates {
            if c.exists() {
                return c.clone();
            }
        }
        candidates[0].clone()
    }
}
