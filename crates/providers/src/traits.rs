use std::pin::Pin;

use mf_domain::error::Result;

/// A boxed async stream of text tokens.
pub type BoxTokenStream = Pin<Box<dyn futures_core::Stream<Item = Result<String>> + Send + 'static>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic completion request.
///
/// The orchestration core builds fully rendered prompts, so a single
/// prompt string (plus an optional inline image for vision turns) is
/// the whole contract.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional `data:` URL attached as an image part (vision lane).
    pub image_data_url: Option<String>,
}

impl InvokeRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            image_data_url: None,
        }
    }

    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image_data_url = Some(data_url.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request and wait for the full response text.
    async fn invoke(&self, req: &InvokeRequest) -> Result<String>;

    /// Send a completion request and return a stream of text tokens.
    async fn stream(&self, req: &InvokeRequest) -> Result<BoxTokenStream>;

    /// Embed a batch of texts, one vector per input.
    async fn embeddings(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// The model this client is bound to.
    fn model(&self) -> &str;
}

/// Media generation capability (images, speech) exposed by providers
/// that support it. Returns raw bytes; persistence is the caller's job.
#[async_trait::async_trait]
pub trait MediaClient: Send + Sync {
    async fn generate_image(&self, model: &str, prompt: &str, size: &str) -> Result<Vec<u8>>;

    async fn synthesize_speech(&self, model: &str, voice: &str, text: &str) -> Result<Vec<u8>>;
}
