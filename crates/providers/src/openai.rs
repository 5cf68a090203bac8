//! OpenAI-compatible adapter.
//!
//! Speaks the chat-completions wire format, which also covers the
//! compatibility endpoints published by the other supported vendors.
//! One adapter therefore serves the planner, synthesizer, vision lane,
//! embeddings, image generation, and speech synthesis.

use std::time::Duration;

use base64::Engine;
use serde_json::Value;

use mf_domain::error::{Error, Result};

use crate::traits::{BoxTokenStream, InvokeRequest, LlmClient, MediaClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client bound to one OpenAI-compatible endpoint and model.
pub struct OpenAiClient {
    provider_id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        Ok(Self {
            provider_id: provider_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    /// Build the chat-completions body. Vision requests attach the
    /// image as a content part on the single user message.
    fn build_chat_body(&self, req: &InvokeRequest, stream: bool) -> Value {
        let content: Value = match &req.image_data_url {
            Some(data_url) => serde_json::json!([
                {"type": "text", "text": req.prompt},
                {"type": "image_url", "image_url": {"url": data_url}},
            ]),
            None => Value::String(req.prompt.clone()),
        };

        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "temperature": req.temperature,
            "stream": stream,
        })
    }

    async fn send_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authed_post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url}: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading body: {e}")))?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let json: Value = serde_json::from_str(&text)?;
        Ok(json)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE stream handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one chat-completions stream payload amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamDelta {
    Token(String),
    Done,
}

/// Accumulates raw response bytes and yields the `data:` payload of
/// each complete SSE frame (frames end at a blank line; a frame's
/// data lines are joined with `\n`). Frames with no data — comments,
/// keep-alives — are swallowed.
#[derive(Default)]
struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Pop the next buffered payload, leaving any trailing partial
    /// frame for later chunks.
    fn next_payload(&mut self) -> Option<String> {
        loop {
            let boundary = self.pending.find("\n\n")?;
            let frame: String = self.pending.drain(..boundary + 2).collect();
            let payload = frame
                .lines()
                .filter_map(|line| line.trim().strip_prefix("data:"))
                .map(str::trim)
                .filter(|data| !data.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !payload.is_empty() {
                return Some(payload);
            }
        }
    }

    /// Once the body closes, treat whatever is left as a final frame
    /// (providers sometimes omit the trailing blank line).
    fn flush(&mut self) -> Option<String> {
        if self.pending.trim().is_empty() {
            self.pending.clear();
            return None;
        }
        self.pending.push_str("\n\n");
        self.next_payload()
    }
}

fn parse_stream_payload(data: &str) -> Vec<Result<StreamDelta>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamDelta::Done)];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return Vec::new();
    };

    if choice
        .get("finish_reason")
        .map(|f| !f.is_null())
        .unwrap_or(false)
    {
        // The content delta, if any, arrives on the same chunk.
        let mut out = Vec::new();
        if let Some(text) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(|c| c.as_str())
        {
            if !text.is_empty() {
                out.push(Ok(StreamDelta::Token(text.to_string())));
            }
        }
        out.push(Ok(StreamDelta::Done));
        return out;
    }

    match choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => vec![Ok(StreamDelta::Token(text.to_string()))],
        _ => Vec::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(&self, req: &InvokeRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);

        tracing::debug!(provider = %self.provider_id, model = %self.model, "chat request");
        let json = self.send_json(&url, &body).await?;

        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| Error::Provider {
                provider: self.provider_id.clone(),
                message: "no content in chat response".into(),
            })?;

        Ok(content.to_string())
    }

    async fn stream(&self, req: &InvokeRequest) -> Result<BoxTokenStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);

        tracing::debug!(provider = %self.provider_id, model = %self.model, "chat stream request");
        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let stream = async_stream::stream! {
            let mut response = resp;
            let mut frames = FrameBuffer::default();

            'read: loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        frames.push(&bytes);
                        while let Some(payload) = frames.next_payload() {
                            for delta in parse_stream_payload(&payload) {
                                match delta {
                                    Ok(StreamDelta::Token(text)) => yield Ok(text),
                                    Ok(StreamDelta::Done) => break 'read,
                                    Err(e) => {
                                        yield Err(e);
                                        break 'read;
                                    }
                                }
                            }
                        }
                    }
                    Ok(None) => {
                        // Body closed without the [DONE] sentinel;
                        // salvage any trailing tokens.
                        if let Some(payload) = frames.flush() {
                            for delta in parse_stream_payload(&payload) {
                                if let Ok(StreamDelta::Token(text)) = delta {
                                    yield Ok(text);
                                }
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(Error::Http(format!("stream read: {e}")));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": input });
        let json = self.send_json(&url, &body).await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Provider {
                provider: self.provider_id.clone(),
                message: "missing 'data' array in embeddings response".into(),
            })?;

        let embeddings: Vec<Vec<f32>> = data
            .iter()
            .filter_map(|item| {
                let embedding = item.get("embedding")?.as_array()?;
                Some(
                    embedding
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect(),
                )
            })
            .collect();

        if embeddings.len() != input.len() {
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!(
                    "embedding count mismatch: {} inputs, {} vectors",
                    input.len(),
                    embeddings.len()
                ),
            });
        }

        Ok(embeddings)
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MediaClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl MediaClient for OpenAiClient {
    async fn generate_image(&self, model: &str, prompt: &str, size: &str) -> Result<Vec<u8>> {
        let url = format!("{}/images/generations", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "size": size,
        });

        let json = self.send_json(&url, &body).await?;
        let b64 = json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|item| item.get("b64_json"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Provider {
                provider: self.provider_id.clone(),
                message: "image API returned no image bytes".into(),
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("invalid base64 image payload: {e}"),
            })
    }

    async fn synthesize_speech(&self, model: &str, voice: &str, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "voice": voice,
            "input": text,
        });

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.provider_id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("reading audio body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_model_and_temperature() {
        let client = OpenAiClient::new("openai", "https://api.openai.com/v1", "k", "gpt-4o-mini")
            .unwrap();
        let req = InvokeRequest::new("hello", 0.2);
        let body = client.build_chat_body(&req, true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "hello");
    }

    #[test]
    fn vision_request_uses_content_parts() {
        let client =
            OpenAiClient::new("openai", "https://api.openai.com/v1", "k", "gpt-4o-mini").unwrap();
        let req = InvokeRequest::new("describe this", 0.2).with_image("data:image/png;base64,AAAA");
        let body = client.build_chat_body(&req, false);
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn stream_payload_token_delta() {
        let payload = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let out = parse_stream_payload(payload);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].as_ref().unwrap(), StreamDelta::Token(t) if t == "Hel"));
    }

    #[test]
    fn stream_payload_done_sentinel() {
        let out = parse_stream_payload("[DONE]");
        assert!(matches!(out[0].as_ref().unwrap(), StreamDelta::Done));
    }

    #[test]
    fn stream_payload_finish_reason_flushes_and_ends() {
        let payload = r#"{"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#;
        let out = parse_stream_payload(payload);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0].as_ref().unwrap(), StreamDelta::Token(t) if t == "!"));
        assert!(matches!(out[1].as_ref().unwrap(), StreamDelta::Done));
    }

    #[test]
    fn stream_payload_empty_delta_skipped() {
        let payload = r#"{"choices":[{"delta":{}}]}"#;
        assert!(parse_stream_payload(payload).is_empty());
    }

    // ── Frame buffer ──────────────────────────────────────────────

    #[test]
    fn frame_buffer_yields_payload_per_frame() {
        let mut frames = FrameBuffer::default();
        frames.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(frames.next_payload().as_deref(), Some("{\"a\":1}"));
        assert_eq!(frames.next_payload().as_deref(), Some("{\"b\":2}"));
        assert_eq!(frames.next_payload(), None);
    }

    #[test]
    fn frame_buffer_holds_partial_frame_across_pushes() {
        let mut frames = FrameBuffer::default();
        // A network chunk splits the frame mid-payload.
        frames.push(b"data: {\"choices\":");
        assert_eq!(frames.next_payload(), None);
        frames.push(b"[]}\n\n");
        assert_eq!(frames.next_payload().as_deref(), Some("{\"choices\":[]}"));
    }

    #[test]
    fn frame_buffer_joins_split_data_lines() {
        let mut frames = FrameBuffer::default();
        frames.push(b"data: first half\ndata: second half\n\n");
        assert_eq!(frames.next_payload().as_deref(), Some("first half\nsecond half"));
    }

    #[test]
    fn frame_buffer_swallows_keepalive_frames() {
        let mut frames = FrameBuffer::default();
        frames.push(b": ping\n\nevent: message\ndata: real\n\n");
        assert_eq!(frames.next_payload().as_deref(), Some("real"));
        assert_eq!(frames.next_payload(), None);
    }

    #[test]
    fn frame_buffer_flush_recovers_unterminated_tail() {
        let mut frames = FrameBuffer::default();
        frames.push(b"data: tail without blank line");
        assert_eq!(frames.next_payload(), None);
        assert_eq!(frames.flush().as_deref(), Some("tail without blank line"));

        // Flushing an exhausted buffer yields nothing.
        assert_eq!(frames.flush(), None);
    }

    #[test]
    fn done_sentinel_survives_framing() {
        let mut frames = FrameBuffer::default();
        frames.push(b"data: [DONE]\n\n");
        let payload = frames.next_payload().unwrap();
        assert!(matches!(
            parse_stream_payload(&payload)[0].as_ref().unwrap(),
            StreamDelta::Done
        ));
    }
}
