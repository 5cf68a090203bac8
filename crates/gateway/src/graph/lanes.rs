//! Lane executor node: runs the knowledge and media cohorts
//! concurrently, supervises per-task timeouts and subject-lock
//! retries, merges artifact memory, and drives the synthesizer once
//! the knowledge cohort has joined.
//!
//! Block pairing is enforced here: `block_start` for every task is
//! emitted before dispatch, and each task's worker scope emits exactly
//! one `block_end` whatever happens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use mf_domain::error::{Error, Result};
use mf_domain::event::EventType;
use mf_domain::result::ToolResult;
use mf_domain::state::{ArtifactKind, ArtifactMemory, ArtifactSlot, RunState, StateUpdate};
use mf_domain::task::{Task, TaskSpec};
use mf_lanes::{run_task, LaneContext, LaneServices};
use mf_providers::{InvokeRequest, ProviderRegistry};

use crate::bus::Emitter;
use crate::cancel::CancelToken;
use crate::graph::runner::Node;
use crate::graph::{synth, GraphCx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subject lock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The generated prompt must contain the first two ≥3-char tokens of
/// the subject lock.
pub fn subject_lock_ok(prompt: &str, subject_lock: Option<&str>) -> bool {
    let Some(lock) = subject_lock else {
        return true;
    };
    let prompt = prompt.to_lowercase();
    let required: Vec<String> = lock
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .map(str::to_string)
        .collect();
    !required.is_empty() && required.iter().take(2).all(|w| prompt.contains(w.as_str()))
}

/// Human phrase naming the produced artifacts ("image and audio").
pub fn task_phrase(tasks: &[Task]) -> String {
    let kinds: Vec<&str> = tasks.iter().map(|t| t.kind()).collect();
    let mut labels: Vec<&str> = Vec::new();
    if kinds.contains(&"doc") {
        labels.push("document");
    }
    if kinds.contains(&"image_gen") {
        labels.push("image");
    }
    if kinds.contains(&"tts") {
        labels.push("audio");
    }
    if kinds.contains(&"web") {
        labels.push("web results");
    }
    if kinds.contains(&"rag") {
        labels.push("document analysis");
    }
    if kinds.contains(&"vision") {
        labels.push("vision analysis");
    }
    match labels.len() {
        0 => "response".into(),
        1 => labels[0].into(),
        2 => format!("{} and {}", labels[0], labels[1]),
        _ => format!("{}, and {}", labels[..labels.len() - 1].join(", "), labels[labels.len() - 1]),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared per-run executor state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ExecShared {
    emitter: Emitter,
    services: Arc<LaneServices>,
    registry: Arc<ProviderRegistry>,
    lane_ctx: LaneContext,
    cancel: CancelToken,
    max_replans: u32,
    image_timeout: Duration,
    linked_image_id: Option<String>,
    outs: Mutex<HashMap<String, ToolResult>>,
    artifacts: Mutex<ArtifactMemory>,
    last_image_prompt: Mutex<Option<String>>,
}

impl ExecShared {
    /// Condense a successful knowledge lane's output for the
    /// synthesizer; failures silently yield no summary.
    async fn supportive_summary(&self, kind: &str, task: &Task, out: &ToolResult) -> String {
        let (provider, model) = self.services.config.routing.support_model(
            kind,
            &self.lane_ctx.provider,
            &self.lane_ctx.model,
        );
        let data_text: String = out.data.to_string().chars().take(7000).collect();
        let prompt = format!(
            "Summarize this lane output for the main responder.\n\
             Return concise markdown with only grounded facts (max 6 lines).\n\n\
             Lane kind: {kind}\n\
             User query: {}\n\
             Lane output data:\n{data_text}\n",
            task.anchor()
        );

        let client = match self.registry.client(&provider, &model) {
            Ok(c) => c,
            Err(_) => return String::new(),
        };
        match client.invoke(&InvokeRequest::new(prompt, 0.1)).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!(kind, error = %e, "supportive summary skipped");
                String::new()
            }
        }
    }

    fn record_artifacts(&self, task: &Task, out: &ToolResult) {
        if !out.ok {
            return;
        }
        match &task.spec {
            TaskSpec::ImageGen { prompt, .. } => {
                let produced_prompt = {
                    let p = out.data_str("prompt");
                    if p.is_empty() { prompt.as_str() } else { p }
                }
                .trim()
                .to_string();
                if !produced_prompt.is_empty() {
                    *self.last_image_prompt.lock() = Some(produced_prompt.clone());
                }

                let filename = out.data_str("filename").to_string();
                let url = out.data_str("url").to_string();
                let mut artifacts = self.artifacts.lock();
                artifacts.set_slot(
                    ArtifactKind::Image,
                    ArtifactSlot {
                        id: filename.clone(),
                        url,
                        prompt_or_text: produced_prompt,
                    },
                );
                if let Some(parent_id) = &self.linked_image_id {
                    if !filename.is_empty() && parent_id != &filename {
                        artifacts
                            .lineage
                            .push_edge(ArtifactKind::Image, parent_id, &filename, "edit");
                    }
                }
            }
            TaskSpec::Tts { text, .. } => {
                self.artifacts.lock().set_slot(
                    ArtifactKind::Audio,
                    ArtifactSlot {
                        id: out.data_str("filename").to_string(),
                        url: out.data_str("url").to_string(),
                        prompt_or_text: text.trim().to_string(),
                    },
                );
            }
            TaskSpec::Doc { .. } => {
                self.artifacts.lock().set_slot(
                    ArtifactKind::Doc,
                    ArtifactSlot {
                        id: out.data_str("filename").to_string(),
                        url: out.data_str("url").to_string(),
                        prompt_or_text: out.data_str("text").chars().take(2000).collect(),
                    },
                );
            }
            _ => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-task execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn dispatch_image(shared: &ExecShared, task: &Task) -> ToolResult {
    let mut current = task.clone();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let timeout_secs = shared.image_timeout.as_secs().max(1);
        let out = match tokio::time::timeout(
            shared.image_timeout,
            run_task(&current, &shared.lane_ctx, &shared.services),
        )
        .await
        {
            Ok(out) => out,
            Err(_) => ToolResult::fail(
                &task.id,
                "image_gen",
                format!("Image generation timed out after {timeout_secs}s"),
            ),
        };

        let TaskSpec::ImageGen { prompt, subject_lock, .. } = &current.spec else {
            return out;
        };
        if subject_lock_ok(prompt, subject_lock.as_deref()) || attempts > shared.max_replans {
            return out;
        }

        // One fast replan with a stronger constraint for subject
        // stability.
        let lock = subject_lock.clone().unwrap_or_default();
        tracing::info!(task_id = %task.id, attempts, "subject lock mismatch, replanning image prompt");
        if let TaskSpec::ImageGen { prompt, .. } = &mut current.spec {
            *prompt = format!(
                "{prompt}\n\nCRITICAL CONSTRAINT: Keep the main subject as '{lock}'. \
                 Do not replace it with any other animal or object."
            );
        }
    }
}

async fn run_one(shared: Arc<ExecShared>, task: Task) {
    let kind = task.kind();
    let mut start_data = json!({"task_id": task.id, "kind": kind});
    if let TaskSpec::Web { query, sources, .. } = &task.spec {
        start_data["query"] = json!(query);
        start_data["sources"] = json!(sources);
    }
    shared.emitter.emit(EventType::TaskStart, start_data).await;

    let out = if shared.cancel.is_cancelled() {
        ToolResult::fail(&task.id, kind, "run cancelled")
    } else if kind == "image_gen" {
        dispatch_image(&shared, &task).await
    } else {
        run_task(&task, &shared.lane_ctx, &shared.services).await
    };

    let mut out = out;
    if out.ok && matches!(kind, "web" | "rag" | "kb_rag" | "vision") {
        let support = shared.supportive_summary(kind, &task, &out).await;
        if !support.is_empty() {
            if !out.data.is_object() {
                out.data = json!({});
            }
            out.data["support_summary"] = json!(support);
            out.data["text"] = json!(support);
            out.data["mime"] = json!("text/markdown");
        }
    }

    shared.record_artifacts(&task, &out);

    shared
        .emitter
        .emit(
            EventType::TaskResult,
            json!({"task_id": task.id, "kind": kind, "ok": out.ok}),
        )
        .await;

    let ok = out.ok;
    shared
        .emitter
        .emit(
            EventType::BlockEnd,
            json!({"block_id": task.id, "payload": &out}),
        )
        .await;
    shared.outs.lock().insert(task.id.clone(), out);

    tracing::info!(task_id = %task.id, kind, ok, "task done");
}

async fn run_group(shared: Arc<ExecShared>, tasks: Vec<Task>) {
    let futures: Vec<_> = tasks.into_iter().map(|t| run_one(shared.clone(), t)).collect();
    futures_util::future::join_all(futures).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LanesNode;

#[async_trait::async_trait]
impl Node for LanesNode {
    fn name(&self) -> &'static str {
        "lanes"
    }

    async fn run(&self, state: &RunState, cx: &GraphCx) -> Result<StateUpdate> {
        let tasks = state.tasks.clone();
        let plan_tasks: Vec<_> = tasks
            .iter()
            .map(|t| json!({"id": t.id, "kind": t.kind()}))
            .collect();
        cx.emitter
            .emit(
                EventType::Plan,
                json!({"mode": state.plan.mode, "tasks": plan_tasks, "iteration": state.plan_runtime.iteration}),
            )
            .await;
        for task in &tasks {
            cx.emitter
                .emit(
                    EventType::BlockStart,
                    json!({"block_id": task.id, "title": task.title(), "kind": task.kind()}),
                )
                .await;
        }

        let knowledge: Vec<Task> = tasks.iter().filter(|t| t.is_knowledge()).cloned().collect();
        let media: Vec<Task> = tasks.iter().filter(|t| !t.is_knowledge()).cloned().collect();
        let tools_only_turn = !tasks.is_empty() && !state.plan.text.enabled;
        let should_emit_text = state.plan.text.enabled || !knowledge.is_empty();

        tracing::info!(
            run_id = %state.run_id,
            mode = ?state.plan.mode,
            tasks = ?tasks.iter().map(|t| t.kind()).collect::<Vec<_>>(),
            should_emit_text,
            "lane plan"
        );

        let mut intro = String::new();
        if tools_only_turn {
            intro = format!("Sure, I will generate your {}.\n\n", task_phrase(&tasks));
            cx.emitter.emit(EventType::Token, json!({"text": intro})).await;
        }

        let shared = Arc::new(ExecShared {
            emitter: cx.emitter.clone(),
            services: cx.services.clone(),
            registry: cx.registry.clone(),
            lane_ctx: LaneContext {
                session_id: state.session_id.clone(),
                user_text: state.user_text.clone(),
                attachments: state.attachments.clone(),
                provider: cx.provider.clone(),
                model: cx.model.clone(),
            },
            cancel: cx.cancel.clone(),
            max_replans: state.plan_runtime.max_replans,
            image_timeout: cx.config.pacing.image_task_timeout,
            linked_image_id: state
                .linked_artifact
                .as_ref()
                .filter(|l| l.kind == ArtifactKind::Image)
                .map(|l| l.id.clone()),
            outs: Mutex::new(state.tool_outputs.clone()),
            artifacts: Mutex::new(state.artifact_memory.clone()),
            last_image_prompt: Mutex::new(state.last_image_prompt.clone()),
        });

        let mut knowledge_job = (!knowledge.is_empty())
            .then(|| tokio::spawn(run_group(shared.clone(), knowledge)));
        let mut media_job = (!media.is_empty()).then(|| tokio::spawn(run_group(shared.clone(), media)));

        let mut llm_text = String::new();
        if should_emit_text {
            // The synthesizer depends on retrieval context, so the
            // knowledge cohort must join first; media lanes keep
            // running concurrently with the token stream.
            if let Some(job) = knowledge_job.take() {
                job.await.map_err(|e| Error::Other(format!("knowledge cohort panicked: {e}")))?;
            }
            let outs_snapshot = shared.outs.lock().clone();
            llm_text = synth::synthesize(state, &outs_snapshot, cx).await?;
        }

        if let Some(job) = media_job.take() {
            job.await.map_err(|e| Error::Other(format!("media cohort panicked: {e}")))?;
        }
        if let Some(job) = knowledge_job.take() {
            job.await.map_err(|e| Error::Other(format!("knowledge cohort panicked: {e}")))?;
        }

        let mut outro = String::new();
        if tools_only_turn {
            outro = format!("\n\nHere is your {}.", task_phrase(&tasks));
            cx.emitter.emit(EventType::Token, json!({"text": outro})).await;
        }

        let final_text = format!("{intro}{llm_text}{outro}");
        let outs = shared.outs.lock().clone();
        let artifacts = shared.artifacts.lock().clone();
        let last_image_prompt = shared.last_image_prompt.lock().clone();

        Ok(StateUpdate {
            tool_outputs: Some(outs),
            final_text: Some(final_text),
            artifact_memory: Some(artifacts),
            last_image_prompt,
            ..Default::default()
        }
        .note("lanes", "Lane execution complete", json!({"tasks": tasks.len()})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::task::ImageSize;

    fn image_task(prompt: &str, lock: Option<&str>) -> Task {
        Task::new(TaskSpec::ImageGen {
            prompt: prompt.into(),
            size: ImageSize::Square1024,
            subject_lock: lock.map(str::to_string),
        })
    }

    #[test]
    fn subject_lock_checks_first_two_long_tokens() {
        assert!(subject_lock_ok("a phoenix rising over mountains", Some("a phoenix")));
        assert!(!subject_lock_ok("a dragon over mountains", Some("a phoenix")));
        // Lock tokens shorter than 3 chars never pass the filter on
        // their own, so an all-short lock fails closed.
        assert!(!subject_lock_ok("anything", Some("a of")));
        assert!(subject_lock_ok("anything at all", None));
        assert!(subject_lock_ok(
            "a minimal owl logo on red background",
            Some("a minimal owl logo")
        ));
    }

    #[test]
    fn task_phrase_joins_labels() {
        let tasks = vec![image_task("x", None)];
        assert_eq!(task_phrase(&tasks), "image");

        let tasks = vec![
            image_task("x", None),
            Task::new(TaskSpec::Tts {
                text: "hi".into(),
                voice: "alloy".into(),
            }),
        ];
        assert_eq!(task_phrase(&tasks), "image and audio");

        assert_eq!(task_phrase(&[]), "response");
    }

    // ── Executor integration (stub media, no network) ─────────────

    use crate::graph::test_support::test_cx;
    use mf_domain::event::{EventType, SseEvent};
    use mf_domain::state::{ArtifactKind, LinkedArtifact};
    use tokio::sync::mpsc;

    async fn drain(rx: &mut mpsc::Receiver<Option<SseEvent>>) -> Vec<SseEvent> {
        let mut events = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Some(ev) = item {
                events.push(ev);
            }
        }
        events
    }

    #[tokio::test]
    async fn tools_only_tts_turn_pairs_blocks_and_records_audio() {
        let (cx, mut rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "generate audio for hello");
        state.plan.text.enabled = false;
        state.plan.mode = mf_domain::plan::PlanMode::ToolsOnly;
        let task = Task::new(TaskSpec::Tts {
            text: "hello".into(),
            voice: "alloy".into(),
        });
        let task_id = task.id.clone();
        state.tasks = vec![task];

        let update = LanesNode.run(&state, &cx).await.unwrap();

        // Final text is the scripted intro/outro envelope.
        let final_text = update.final_text.unwrap();
        assert!(final_text.starts_with("Sure, I will generate your audio."));
        assert!(final_text.ends_with("Here is your audio."));

        // The audio slot was filled from the lane result.
        let artifacts = update.artifact_memory.unwrap();
        let audio = artifacts.audio.expect("audio slot set");
        assert!(audio.url.contains("/api/assets/s1/"));
        assert_eq!(audio.prompt_or_text, "hello");

        let outs = update.tool_outputs.unwrap();
        assert!(outs[&task_id].ok);

        // Stream invariants: one start before one end for the task id,
        // task events in between.
        let events = drain(&mut rx).await;
        let starts: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event_type == EventType::BlockStart && e.data["block_id"] == task_id.as_str())
            .collect();
        let ends: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event_type == EventType::BlockEnd && e.data["block_id"] == task_id.as_str())
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(ends.len(), 1);
        assert!(starts[0].0 < ends[0].0);
        assert!(events.iter().any(|e| e.event_type == EventType::Plan));
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::TaskResult && e.data["ok"] == true));
    }

    #[tokio::test]
    async fn subject_lock_mismatch_retries_once_and_links_lineage() {
        let (cx, mut rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "make the background red");
        state.plan.text.enabled = false;
        state.plan.mode = mf_domain::plan::PlanMode::ToolsOnly;
        state.plan_runtime.max_replans = 1;
        state.linked_artifact = Some(LinkedArtifact {
            kind: ArtifactKind::Image,
            id: "o1".into(),
            prompt: "a minimal owl logo".into(),
            url: "/api/assets/s1/o1.png".into(),
        });
        // The routed prompt is missing the locked subject.
        let task = image_task("a red background", Some("a phoenix"));
        let task_id = task.id.clone();
        state.tasks = vec![task];

        let update = LanesNode.run(&state, &cx).await.unwrap();

        let outs = update.tool_outputs.unwrap();
        let out = &outs[&task_id];
        assert!(out.ok);
        // The retry appended the subject constraint to the prompt.
        assert!(out.data_str("prompt").contains("CRITICAL CONSTRAINT"));
        assert!(out.data_str("prompt").to_lowercase().contains("phoenix"));

        // The edit derived from the linked artifact: lineage edge o1 → child.
        let artifacts = update.artifact_memory.unwrap();
        let child_id = artifacts.image.as_ref().expect("image slot set").id.clone();
        let edges = artifacts.lineage.edges(ArtifactKind::Image);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].parent_id, "o1");
        assert_eq!(edges[0].op, "edit");
        assert_eq!(edges[0].child_id, child_id);

        assert_eq!(update.last_image_prompt.as_deref().map(|p| p.contains("phoenix")), Some(true));

        let events = drain(&mut rx).await;
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::BlockEnd && e.data["block_id"] == task_id.as_str()));
    }

    #[tokio::test]
    async fn lane_failure_is_isolated_to_its_block() {
        let (cx, mut rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "extract my file");
        state.plan.text.enabled = false;
        state.plan.mode = mf_domain::plan::PlanMode::ToolsOnly;
        // Extract with a missing attachment fails inside the worker.
        let bad = Task::new(TaskSpec::Doc {
            instruction: mf_domain::task::DocInstruction::Extract,
            attachment_id: Some("ghost".into()),
            prompt: None,
            format: mf_domain::task::DocFormat::Txt,
        });
        let good = Task::new(TaskSpec::Tts {
            text: "still works".into(),
            voice: "alloy".into(),
        });
        let bad_id = bad.id.clone();
        let good_id = good.id.clone();
        state.tasks = vec![bad, good];

        let update = LanesNode.run(&state, &cx).await.unwrap();
        let outs = update.tool_outputs.unwrap();
        assert!(!outs[&bad_id].ok);
        assert!(outs[&bad_id].error.as_deref().unwrap_or("").contains("Attachment not found"));
        assert!(outs[&good_id].ok);

        // Both blocks closed regardless of the failure.
        let events = drain(&mut rx).await;
        for id in [&bad_id, &good_id] {
            assert!(events
                .iter()
                .any(|e| e.event_type == EventType::BlockEnd && e.data["block_id"] == id.as_str()));
        }
    }
}
