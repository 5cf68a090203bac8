//! The orchestration graph: node wiring, the per-run context handed to
//! every node, and the turn driver.

pub mod lanes;
pub mod meta;
pub mod nodes;
pub mod runner;
pub mod streaming;
pub mod synth;

use std::sync::Arc;

use regex::Regex;
use serde_json::json;

use mf_domain::config::Config;
use mf_domain::error::Result;
use mf_domain::event::EventType;
use mf_domain::state::{CheckerSummary, RunState};
use mf_lanes::LaneServices;
use mf_providers::ProviderRegistry;

use crate::bus::Emitter;
use crate::cancel::CancelToken;
use crate::graph::nodes::intent::greeting_regex;
use crate::graph::runner::{Graph, GraphBuilder, END};
use crate::graph::streaming::stream_tokens;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GraphCx
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a node may need beyond the state snapshot.
pub struct GraphCx {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub services: Arc<LaneServices>,
    pub emitter: Emitter,
    /// Provider/model selected by the client for this run.
    pub provider: String,
    pub model: String,
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Topology
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn route_after_planner(state: &RunState) -> &'static str {
    if state.plan.text.enabled {
        "text_router"
    } else if state.plan.flags.any_tool() {
        "tool_router"
    } else {
        "lanes"
    }
}

fn route_after_text_router(state: &RunState) -> &'static str {
    if state.plan.flags.any_tool() {
        "tool_router"
    } else {
        "lanes"
    }
}

fn route_after_reflect(state: &RunState) -> &'static str {
    if state.plan_runtime.replan_requested {
        "tool_router"
    } else {
        END
    }
}

/// Build the fixed planning graph:
/// `ack → context → intent → planner → (text_router?) →
///  (tool_router → task_validate → role_pack)? → lanes → reflect →
///  {tool_router | end}`.
pub fn build_graph() -> Result<Graph> {
    GraphBuilder::new()
        .node(Box::new(nodes::ack::AckNode))
        .node(Box::new(nodes::context::ContextNode))
        .node(Box::new(nodes::intent::IntentNode))
        .node(Box::new(nodes::planner::PlannerNode))
        .node(Box::new(nodes::text_router::TextRouterNode))
        .node(Box::new(nodes::tool_router::ToolRouterNode))
        .node(Box::new(nodes::task_validate::TaskValidateNode))
        .node(Box::new(nodes::role_pack::RolePackNode))
        .node(Box::new(lanes::LanesNode))
        .node(Box::new(nodes::reflect::ReflectNode))
        .entry("ack")
        .edge("ack", "context")
        .edge("context", "intent")
        .edge("intent", "planner")
        .conditional_edge("planner", route_after_planner, &["text_router", "tool_router", "lanes"])
        .conditional_edge("text_router", route_after_text_router, &["tool_router", "lanes"])
        .edge("tool_router", "task_validate")
        .edge("task_validate", "role_pack")
        .edge("role_pack", "lanes")
        .edge("lanes", "reflect")
        .conditional_edge("reflect", route_after_reflect, &["tool_router"])
        .compile()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast text path (graph v2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn explicit_tool_cue_regex() -> Regex {
    Regex::new(
        r"(?i)\b(generate|create|make|draw|image|photo|picture|audio|voice|tts|speak|read aloud|pdf|document|docx|upload|file|attachment|web|internet|news|headline|headlines|search|find|fetch|google|wikipedia|arxiv|paper|preprint|latest|recent|current|today)\b",
    )
    .expect("static regex")
}

/// A turn that can skip planning entirely: plain text, no attachments,
/// no explicit tool cue.
pub fn can_fast_text_path(state: &RunState) -> bool {
    let user = state.user_text.trim();
    !user.is_empty() && state.attachments.is_empty() && !explicit_tool_cue_regex().is_match(user)
}

async fn fast_text_path(state: &mut RunState, cx: &GraphCx) -> Result<()> {
    let (text_provider, text_model) = cx.config.routing.text(&cx.provider, &cx.model);
    let history = &state.chat_history;
    let recent = &history[history.len().saturating_sub(4)..];
    let history_text = recent
        .iter()
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let greeting_clause = if greeting_regex().is_match(&state.user_text) {
        "This turn is a greeting/social opener.\n\
         Reply with exactly one short friendly sentence (max 14 words), no headings.\n"
    } else {
        ""
    };
    let prompt = format!(
        "You are Manifold. Reply directly in markdown.\n\
         Keep it concise, clear, and grounded.\n\
         {greeting_clause}\
         Conversation so far:\n{history_text}\n\n\
         User message:\n{}\n",
        state.user_text
    );

    state.final_text =
        stream_tokens(&prompt, &cx.emitter, &cx.registry, &text_provider, &text_model, 0.2).await?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lane completion summary for the conclusion block.
pub fn checker_summary(state: &RunState) -> CheckerSummary {
    let mut completed = 0;
    let mut failed = 0;
    for task in &state.tasks {
        match state.tool_outputs.get(&task.id) {
            Some(out) if out.ok => completed += 1,
            Some(_) => failed += 1,
            None => {}
        }
    }
    CheckerSummary {
        requested_tasks: state.tasks.len(),
        completed_tasks: completed,
        failed_tasks: failed,
        has_main_text: !state.final_text.trim().is_empty(),
    }
}

/// Drive one turn end to end: `run_start`, the graph (or the fast
/// text path), the conclusion block, and `run_end`. Planner and
/// synthesizer errors surface as `error` + `run_end{ok:false}`; the
/// returned state always reflects what actually happened.
pub async fn run_turn(graph: &Graph, cx: &GraphCx, mut state: RunState) -> RunState {
    let fast = cx.config.graph_v2_enabled && can_fast_text_path(&state);
    let graph_version = if fast { "v2" } else { "v1" };
    cx.emitter
        .emit(
            EventType::RunStart,
            json!({"session_id": state.session_id, "graph_version": graph_version}),
        )
        .await;

    let outcome = if fast {
        fast_text_path(&mut state, cx).await
    } else {
        graph.run(&mut state, cx).await
    };

    match outcome {
        Ok(()) => {
            state.checker = checker_summary(&state);
            if !state.tasks.is_empty() {
                meta::emit_conclusion_block(&cx.emitter, &state.checker).await;
            }
            cx.emitter.emit(EventType::RunEnd, json!({"ok": true})).await;
        }
        Err(e) => {
            tracing::error!(run_id = %state.run_id, error = %e, "run failed");
            cx.cancel.cancel();
            state.final_text = String::new();
            cx.emitter.emit(EventType::Error, json!({"error": e.to_string()})).await;
            cx.emitter.emit(EventType::RunEnd, json!({"ok": false})).await;
        }
    }

    state
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test support
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use mf_domain::event::SseEvent;
    use mf_retrieval::kb::KbService;
    use mf_retrieval::session_index::SessionRag;
    use mf_retrieval::Embedder;
    use tokio::sync::mpsc;

    struct StubEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, input: &[String]) -> mf_domain::Result<Vec<Vec<f32>>> {
            Ok(input.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct StubMedia;

    #[async_trait::async_trait]
    impl mf_providers::MediaClient for StubMedia {
        async fn generate_image(&self, _model: &str, _prompt: &str, _size: &str) -> mf_domain::Result<Vec<u8>> {
            Ok(vec![0u8; 4])
        }

        async fn synthesize_speech(&self, _model: &str, _voice: &str, _text: &str) -> mf_domain::Result<Vec<u8>> {
            Ok(vec![0u8; 4])
        }
    }

    /// A GraphCx over stub services and a fresh temp data dir. The
    /// receiver is returned so emitted events stay deliverable.
    pub(crate) async fn test_cx() -> (GraphCx, mpsc::Receiver<Option<SseEvent>>) {
        let data_dir = std::env::temp_dir().join(format!("manifold-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&data_dir).unwrap();

        let mut config = Config::default();
        config.data_dir = data_dir;
        let config = Arc::new(config);

        let registry = Arc::new(ProviderRegistry::with_keys(None, None, None));
        let embedder: Arc<dyn Embedder> = Arc::new(StubEmbedder);
        let session_rag = Arc::new(SessionRag::new(
            config.sessions_dir(),
            embedder.clone(),
            config.models.embedding_model.clone(),
            config.index.chunk_size,
            config.index.chunk_overlap,
        ));
        let kb = Arc::new(KbService::new(
            config.kb_root(),
            config.kb_index_dir(),
            config.kb_stamp_path(),
            config.index.chunk_size,
            config.index.chunk_overlap,
            config.index.cache_ttl,
            embedder,
        ));
        let services = Arc::new(LaneServices {
            config: config.clone(),
            registry: registry.clone(),
            media: Arc::new(StubMedia),
            session_rag,
            kb,
            http: reqwest::Client::new(),
            uploads_dir: config.uploads_dir(),
        });

        let (emitter, rx) = crate::bus::channel("r-test", None);
        (
            GraphCx {
                config,
                registry,
                services,
                emitter,
                provider: "openai".into(),
                model: "gpt-4o-mini".into(),
                cancel: CancelToken::new(),
            },
            rx,
        )
    }
}
