//! Document lane: extract text from an uploaded attachment, or
//! generate a document from an LLM draft through the deterministic
//! writers.

use std::path::PathBuf;

use mf_domain::error::{Error, Result};
use mf_domain::result::ToolResult;
use mf_domain::task::{DocFormat, DocInstruction, Task};
use mf_providers::InvokeRequest;
use mf_retrieval::loaders::load_docs;

use crate::assets::save_asset;
use crate::docgen::{as_plain_text, pdf_bytes, rtf_bytes};
use crate::worker::{LaneContext, LaneServices};

const EXTRACT_MAX_CHARS: usize = 12_000;

pub async fn run(
    task: &Task,
    instruction: DocInstruction,
    attachment_id: Option<&str>,
    prompt: Option<&str>,
    format: DocFormat,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    match instruction {
        DocInstruction::Extract => extract(task, attachment_id, ctx),
        DocInstruction::Generate => generate(task, prompt, format, ctx, services).await,
    }
}

fn extract(task: &Task, attachment_id: Option<&str>, ctx: &LaneContext) -> Result<ToolResult> {
    let id = attachment_id.ok_or_else(|| Error::Validation("extract requires attachment_id".into()))?;
    let att = ctx
        .attachment(id)
        .ok_or_else(|| Error::Other("Attachment not found".into()))?;

    let docs = load_docs(&[PathBuf::from(&att.path)]);
    if docs.is_empty() {
        return Err(Error::Other(format!("could not read document: {}", att.name)));
    }
    let text: String = docs
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
        .chars()
        .take(EXTRACT_MAX_CHARS)
        .collect();

    Ok(ToolResult::ok(
        &task.id,
        "doc",
        serde_json::json!({
            "text": text,
            "pages": docs.len(),
            "source": att.path,
        }),
    ))
}

/// Length policy for the generated draft, keyed on cue words.
fn length_rules(request: &str) -> &'static str {
    let req = request.to_lowercase();
    let wants_brief = ["brief", "short", "concise", "summary", "summarize", "tldr"]
        .iter()
        .any(|k| req.contains(k));
    let wants_long_form = [
        "1 page",
        "one page",
        "1.5 page",
        "one and a half page",
        "long form",
        "in detail",
        "detailed",
        "deep dive",
        "comprehensive",
    ]
    .iter()
    .any(|k| req.contains(k));

    if wants_brief && !wants_long_form {
        "- Use 2-3 short sections with H2 headings.\n\
         - Use at most 5 bullets total.\n\
         - Hard cap: 120 words.\n"
    } else {
        "- Target ~2 pages (roughly 700-1000 words).\n\
         - Use 5-8 short sections with H2 headings.\n\
         - Use bullets where helpful; max 20 bullets total.\n"
    }
}

async fn generate(
    task: &Task,
    prompt: Option<&str>,
    format: DocFormat,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    let request = prompt.filter(|p| !p.trim().is_empty()).unwrap_or(ctx.user_text.as_str());

    let draft_prompt = format!(
        "Write a clean, concise markdown document from the request below.\n\
         Formatting rules:\n\
         - Keep it brief and well-structured.\n\
         - Include exactly one H1 title.\n\
         {}\
         - Prefer bullets over long paragraphs.\n\
         - Keep each bullet to one sentence.\n\
         - Avoid filler, repetition, and verbose prose.\n\n\
         REQUEST:\n{request}\n",
        length_rules(request)
    );

    let content = services
        .registry
        .invoke_with_fallback(&ctx.provider, &ctx.model, &InvokeRequest::new(draft_prompt, 0.2))
        .await?;
    let content = content.trim();
    let safe = if content.is_empty() {
        "# Document\n\nNo content generated."
    } else {
        content
    };

    let plain = as_plain_text(safe);
    let blob: Vec<u8> = match format {
        DocFormat::Pdf => pdf_bytes(safe),
        DocFormat::Doc => rtf_bytes(safe),
        DocFormat::Md => safe.as_bytes().to_vec(),
        DocFormat::Txt => plain.as_bytes().to_vec(),
    };

    let (filename, url) = save_asset(&services.uploads_dir, &ctx.session_id, format.extension(), &blob)?;

    Ok(ToolResult::ok(
        &task.id,
        "doc",
        serde_json::json!({
            "url": url,
            "filename": filename,
            "mime": format.mime(),
            "text": plain.chars().take(EXTRACT_MAX_CHARS).collect::<String>(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brief_cues_select_short_rules() {
        assert!(length_rules("a brief summary of AI").contains("120 words"));
        assert!(length_rules("a detailed deep dive on AI").contains("700-1000 words"));
        // Detail cues override brief cues.
        assert!(length_rules("a brief but detailed look").contains("700-1000 words"));
    }
}
