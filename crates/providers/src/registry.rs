//! Provider registry: validates provider/model pairs, builds clients,
//! and walks the ordered candidate list when a model id is unknown.

use std::sync::Arc;

use mf_domain::constants::{
    provider_fallback_models, provider_models, DEFAULT_MODEL, DEFAULT_PROVIDER, SUPPORTED_PROVIDERS,
};
use mf_domain::error::{Error, Result};

use crate::openai::OpenAiClient;
use crate::traits::{InvokeRequest, LlmClient, MediaClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and normalize a provider/model pair.
///
/// Unsupported providers and empty model names are validation errors
/// (fatal to the run). Model ids outside the catalog are accepted when
/// they carry the provider's id prefix, so newly released models work
/// without a redeploy.
pub fn normalize(provider: Option<&str>, model: Option<&str>) -> Result<(String, String)> {
    let p = provider.unwrap_or(DEFAULT_PROVIDER).to_lowercase();
    if !SUPPORTED_PROVIDERS.contains(&p.as_str()) {
        return Err(Error::Validation(format!("unsupported provider: {p}")));
    }

    let m = model.unwrap_or(DEFAULT_MODEL).trim().to_string();
    if m.is_empty() {
        return Err(Error::Validation("model cannot be empty".into()));
    }

    if !provider_models(&p).contains(&m.as_str()) {
        let prefixed = match p.as_str() {
            "openai" => m.starts_with("gpt-") || m.starts_with('o') || m.starts_with("chatgpt-"),
            "anthropic" => m.starts_with("claude-"),
            "gemini" => m.starts_with("gemini-"),
            _ => false,
        };
        if !prefixed {
            tracing::debug!(provider = %p, model = %m, "model outside catalog, passing through");
        }
    }

    Ok((p, m))
}

/// Ordered model candidates: the selected id first, then the catalog,
/// then the fallback chain, deduplicated.
pub fn model_candidates(provider: &str, selected_model: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |m: &str| {
        if !m.is_empty() && !out.iter().any(|x| x == m) {
            out.push(m.to_string());
        }
    };
    push(selected_model);
    for m in provider_models(provider) {
        push(m);
    }
    for m in provider_fallback_models(provider) {
        push(m);
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds per-(provider, model) clients against the OpenAI-compatible
/// endpoint of each supported vendor.
pub struct ProviderRegistry {
    openai_api_key: Option<String>,
    anthropic_api_key: Option<String>,
    gemini_api_key: Option<String>,
}

impl ProviderRegistry {
    pub fn from_env(openai_api_key: Option<String>) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key,
            anthropic_api_key: read("ANTHROPIC_API_KEY"),
            gemini_api_key: read("GEMINI_API_KEY"),
        }
    }

    /// Construct with explicit keys (tests and embedded setups).
    pub fn with_keys(
        openai_api_key: Option<String>,
        anthropic_api_key: Option<String>,
        gemini_api_key: Option<String>,
    ) -> Self {
        Self {
            openai_api_key,
            anthropic_api_key,
            gemini_api_key,
        }
    }

    fn endpoint(&self, provider: &str) -> (&'static str, Option<&String>) {
        match provider {
            "anthropic" => ("https://api.anthropic.com/v1", self.anthropic_api_key.as_ref()),
            "gemini" => (
                "https://generativelanguage.googleapis.com/v1beta/openai",
                self.gemini_api_key.as_ref(),
            ),
            _ => ("https://api.openai.com/v1", self.openai_api_key.as_ref()),
        }
    }

    fn build(&self, provider: &str, model: &str) -> Result<OpenAiClient> {
        let (base_url, key) = self.endpoint(provider);
        match key {
            Some(key) => OpenAiClient::new(provider, base_url, key.clone(), model),
            // Missing vendor key degrades to the default provider so a
            // partially configured process still answers.
            None if provider != DEFAULT_PROVIDER => {
                tracing::warn!(provider, "provider key missing, falling back to default provider");
                self.build(DEFAULT_PROVIDER, DEFAULT_MODEL)
            }
            None => Err(Error::Provider {
                provider: provider.to_string(),
                message: "missing env var: OPENAI_API_KEY".into(),
            }),
        }
    }

    /// Build a chat client for a validated provider/model pair.
    pub fn client(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmClient>> {
        Ok(Arc::new(self.build(provider, model)?))
    }

    /// Build a media (image/speech) client. Media lanes always run on
    /// the default provider's endpoints.
    pub fn media_client(&self) -> Result<Arc<dyn MediaClient>> {
        Ok(Arc::new(self.build(DEFAULT_PROVIDER, DEFAULT_MODEL)?))
    }

    /// Embeddings run on the default provider.
    pub fn embedding_client(&self) -> Result<Arc<dyn LlmClient>> {
        self.client(DEFAULT_PROVIDER, DEFAULT_MODEL)
    }

    /// Invoke with model-id fallback: walk the candidate list, retrying
    /// on "not found" errors only.
    pub async fn invoke_with_fallback(
        &self,
        provider: &str,
        model: &str,
        req: &InvokeRequest,
    ) -> Result<String> {
        let candidates = model_candidates(provider, model);
        let last = candidates.len().saturating_sub(1);
        let mut last_err: Option<Error> = None;

        for (idx, candidate) in candidates.iter().enumerate() {
            let client = self.client(provider, candidate)?;
            match client.invoke(req).await {
                Ok(text) => return Ok(text),
                Err(e) if idx < last && e.is_model_not_found() => {
                    tracing::warn!(
                        provider,
                        model = %candidate,
                        error = %e,
                        "model id not found, trying next candidate"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "no model candidates available".into(),
        }))
    }
}
