//! Vision lane: pass the referenced image to the LLM as a data URL.

use base64::Engine;

use mf_domain::error::{Error, Result};
use mf_domain::result::ToolResult;
use mf_domain::task::Task;
use mf_providers::InvokeRequest;

use crate::worker::{LaneContext, LaneServices};

pub async fn run(
    task: &Task,
    prompt: &str,
    image_attachment_id: &str,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    let att = ctx
        .attachment(image_attachment_id)
        .ok_or_else(|| Error::Other("Image not found".into()))?;

    let bytes = std::fs::read(&att.path)?;
    let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let mime = if att.mime.starts_with("image/") { att.mime.as_str() } else { "image/png" };
    let data_url = format!("data:{mime};base64,{b64}");

    let model = services.config.models.vision_model.clone();
    let client = services.registry.client(&ctx.provider, &model)?;
    let text = client
        .invoke(&InvokeRequest::new(prompt, 0.2).with_image(data_url))
        .await?;

    Ok(ToolResult::ok(
        &task.id,
        "vision",
        serde_json::json!({ "text": text, "model": model }),
    ))
}
