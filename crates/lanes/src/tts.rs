//! Text-to-speech lane.

use mf_domain::error::Result;
use mf_domain::result::ToolResult;
use mf_domain::task::Task;

use crate::assets::save_asset;
use crate::worker::{LaneContext, LaneServices};

pub async fn run(
    task: &Task,
    text: &str,
    voice: &str,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    let model = services.config.models.tts_model.clone();
    let bytes = services.media.synthesize_speech(&model, voice, text).await?;
    let (filename, url) = save_asset(&services.uploads_dir, &ctx.session_id, "mp3", &bytes)?;

    Ok(ToolResult::ok(
        &task.id,
        "tts",
        serde_json::json!({
            "url": url,
            "filename": filename,
            "mime": "audio/mpeg",
            "voice": voice,
            "model": model,
        }),
    ))
}
