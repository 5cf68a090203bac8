//! Task dispatch: one entry point the executor calls for every task.

use std::path::PathBuf;
use std::sync::Arc;

use mf_domain::config::Config;
use mf_domain::result::ToolResult;
use mf_domain::state::Attachment;
use mf_domain::task::{Task, TaskSpec};
use mf_providers::{MediaClient, ProviderRegistry};
use mf_retrieval::kb::KbService;
use mf_retrieval::session_index::SessionRag;

use crate::{doc, image, kb_rag, rag, tts, vision, web};

/// Long-lived services shared by all lanes.
pub struct LaneServices {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub media: Arc<dyn MediaClient>,
    pub session_rag: Arc<SessionRag>,
    pub kb: Arc<KbService>,
    pub http: reqwest::Client,
    pub uploads_dir: PathBuf,
}

/// Per-run inputs a worker may need beyond its task.
#[derive(Debug, Clone)]
pub struct LaneContext {
    pub session_id: String,
    pub user_text: String,
    pub attachments: Vec<Attachment>,
    pub provider: String,
    pub model: String,
}

impl LaneContext {
    pub fn attachment(&self, id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == id)
    }
}

/// Run one task to completion. Worker errors become `ok:false`
/// results; they never propagate.
pub async fn run_task(task: &Task, ctx: &LaneContext, services: &LaneServices) -> ToolResult {
    let outcome = match &task.spec {
        TaskSpec::Web { query, top_k, sources } => {
            web::run(task, query, *top_k, sources, ctx, services).await
        }
        TaskSpec::Rag { query, top_k } => rag::run(task, query, *top_k, ctx, services).await,
        TaskSpec::KbRag { query, top_k } => kb_rag::run(task, query, *top_k, services).await,
        TaskSpec::Vision { prompt, image_attachment_id } => {
            vision::run(task, prompt, image_attachment_id, ctx, services).await
        }
        TaskSpec::ImageGen { prompt, size, subject_lock } => {
            image::run(task, prompt, *size, subject_lock.as_deref(), ctx, services).await
        }
        TaskSpec::Tts { text, voice } => tts::run(task, text, voice, ctx, services).await,
        TaskSpec::Doc { instruction, attachment_id, prompt, format } => {
            doc::run(task, *instruction, attachment_id.as_deref(), prompt.as_deref(), *format, ctx, services).await
        }
        TaskSpec::Text { .. } => {
            // Text is the synthesizer's lane; it never reaches dispatch.
            return ToolResult::fail(&task.id, task.kind(), "text tasks are handled by the synthesizer");
        }
    };

    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(task_id = %task.id, kind = task.kind(), error = %e, "lane worker failed");
            ToolResult::fail(&task.id, task.kind(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::task::Task;

    #[test]
    fn context_finds_attachment_by_id() {
        let ctx = LaneContext {
            session_id: "s1".into(),
            user_text: "describe this image".into(),
            attachments: vec![Attachment {
                id: "img1".into(),
                kind: mf_domain::state::ArtifactKind::Image,
                name: "cat.png".into(),
                mime: "image/png".into(),
                path: "/tmp/cat.png".into(),
            }],
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
        };
        assert!(ctx.attachment("img1").is_some());
        assert!(ctx.attachment("nope").is_none());
    }

    #[test]
    fn text_tasks_do_not_dispatch() {
        // Exercised through the sync shape only; no services needed.
        let task = Task::new(TaskSpec::Text { prompt: "hi".into() });
        assert_eq!(task.kind(), "text");
    }
}
