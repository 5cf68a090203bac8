//! Token streaming onto the event bus, with model-id fallback.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use mf_domain::error::{Error, Result};
use mf_domain::event::EventType;
use mf_providers::registry::model_candidates;
use mf_providers::{InvokeRequest, ProviderRegistry};

use crate::bus::Emitter;

/// Stream a completion, emitting each token as a `token` event and
/// returning the accumulated text. Walks the candidate model list on
/// "not found" errors (only before any token has been emitted —
/// mid-stream failures propagate).
pub async fn stream_tokens(
    prompt: &str,
    emitter: &Emitter,
    registry: &ProviderRegistry,
    provider: &str,
    model: &str,
    temperature: f32,
) -> Result<String> {
    let candidates = model_candidates(provider, model);
    let last = candidates.len().saturating_sub(1);

    for (idx, candidate) in candidates.iter().enumerate() {
        let client = registry.client(provider, candidate)?;
        let stream = client.stream(&InvokeRequest::new(prompt, temperature)).await;
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) if idx < last && e.is_model_not_found() => {
                tracing::warn!(provider, model = %candidate, error = %e, "stream model not found, trying next");
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut acc = String::new();
        let mut failover = false;
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(text) => {
                    if !text.is_empty() {
                        emitter.emit(EventType::Token, json!({"text": text})).await;
                        acc.push_str(&text);
                    }
                }
                Err(e) if acc.is_empty() && idx < last && e.is_model_not_found() => {
                    tracing::warn!(provider, model = %candidate, error = %e, "stream failed before first token, trying next");
                    failover = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if !failover {
            return Ok(acc);
        }
    }

    Err(Error::Provider {
        provider: provider.to_string(),
        message: "no model candidates available".into(),
    })
}

/// Emit fixed text word-by-word as `token` events with optional
/// pacing; used for the deterministic arXiv render and KB notice.
pub async fn stream_fixed_text(text: &str, emitter: &Emitter, delay: Duration) {
    let words: Vec<&str> = text.split_inclusive(' ').collect();
    for word in words {
        emitter.emit(EventType::Token, json!({"text": word})).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
