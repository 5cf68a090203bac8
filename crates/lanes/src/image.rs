//! Image generation lane.

use mf_domain::error::Result;
use mf_domain::result::ToolResult;
use mf_domain::task::{ImageSize, Task};

use crate::assets::save_asset;
use crate::worker::{LaneContext, LaneServices};

pub async fn run(
    task: &Task,
    prompt: &str,
    size: ImageSize,
    subject_lock: Option<&str>,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    let mut prompt = prompt.to_string();
    if let Some(lock) = subject_lock {
        if !prompt.to_lowercase().contains(&lock.to_lowercase()) {
            prompt = format!(
                "{prompt}\n\nCRITICAL CONSTRAINT: Keep main subject as '{lock}'. Do not replace it."
            );
        }
    }

    let model = services.config.models.image_model.clone();
    tracing::info!(
        task_id = %task.id,
        session_id = %ctx.session_id,
        size = size.as_str(),
        subject_lock = subject_lock.is_some(),
        "image generation started"
    );

    let bytes = services
        .media
        .generate_image(&model, &prompt, size.as_str())
        .await?;
    let (filename, url) = save_asset(&services.uploads_dir, &ctx.session_id, "png", &bytes)?;

    tracing::info!(task_id = %task.id, filename = %filename, "image generation complete");

    Ok(ToolResult::ok(
        &task.id,
        "image_gen",
        serde_json::json!({
            "url": url,
            "filename": filename,
            "mime": "image/png",
            "size": size.as_str(),
            "model": model,
            "prompt": prompt,
        }),
    ))
}
