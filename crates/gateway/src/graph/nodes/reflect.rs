//! Reflection node: inspect lane outcomes and decide whether to spend
//! the replan budget. The only replan policy is the bounded KB/web
//! fallback — when every tool failed and iterations remain, flip to
//! text_plus_tools and enable the web lane as a KB fallback.

use mf_domain::error::Result;
use mf_domain::plan::PlanMode;
use mf_domain::state::{RunState, StateUpdate};

use crate::graph::runner::Node;
use crate::graph::GraphCx;

pub struct ReflectNode;

#[async_trait::async_trait]
impl Node for ReflectNode {
    fn name(&self) -> &'static str {
        "reflect"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let mut runtime = state.plan_runtime.clone();
        let mut plan = state.plan.clone();
        runtime.iteration += 1;

        let mut success = 0u32;
        let mut failed = 0u32;
        for task in &state.tasks {
            match state.tool_outputs.get(&task.id) {
                Some(out) if out.ok => success += 1,
                Some(_) => failed += 1,
                None => {}
            }
        }

        let mut replan_requested = false;
        let mut replan_reason = String::new();

        if !state.tasks.is_empty()
            && success == 0
            && failed > 0
            && runtime.iteration < runtime.max_iterations
        {
            replan_requested = true;
            replan_reason = "all_tools_failed_retry_once".into();
            plan.text.enabled = true;
            plan.mode = PlanMode::TextPlusTools;
            // A failed KB lookup gets one web fallback attempt.
            if state.tasks.iter().any(|t| t.kind() == "kb_rag") {
                plan.flags.needs_web = true;
            }
        }

        runtime.replan_requested = replan_requested;
        runtime.replan_reason = replan_reason.clone();
        runtime.success_count = success;
        runtime.failed_count = failed;

        let note = serde_json::json!({
            "iteration": runtime.iteration,
            "max_iterations": runtime.max_iterations,
            "success": success,
            "failed": failed,
            "replan_requested": replan_requested,
            "reason": replan_reason,
        });
        Ok(StateUpdate {
            plan: Some(plan),
            plan_runtime: Some(runtime),
            ..Default::default()
        }
        .note("reflect", "Reflection complete", note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_cx;
    use mf_domain::result::ToolResult;
    use mf_domain::task::{Task, TaskSpec};

    fn kb_task() -> Task {
        Task::new(TaskSpec::KbRag {
            query: "q".into(),
            top_k: 6,
        })
    }

    #[tokio::test]
    async fn all_failed_requests_one_replan_with_web_fallback() {
        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "tell me about employee X");
        let task = kb_task();
        state
            .tool_outputs
            .insert(task.id.clone(), ToolResult::fail(&task.id, "kb_rag", "index down"));
        state.tasks = vec![task];
        state.plan_runtime.max_iterations = 2;

        let update = ReflectNode.run(&state, &cx).await.unwrap();
        let runtime = update.plan_runtime.unwrap();
        let plan = update.plan.unwrap();
        assert!(runtime.replan_requested);
        assert_eq!(runtime.replan_reason, "all_tools_failed_retry_once");
        assert!(plan.flags.needs_web);
        assert_eq!(plan.mode, PlanMode::TextPlusTools);
    }

    #[tokio::test]
    async fn iteration_cap_stops_replanning() {
        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "tell me about employee X");
        let task = kb_task();
        state
            .tool_outputs
            .insert(task.id.clone(), ToolResult::fail(&task.id, "kb_rag", "index down"));
        state.tasks = vec![task];
        state.plan_runtime.max_iterations = 2;
        state.plan_runtime.iteration = 1; // second pass

        let update = ReflectNode.run(&state, &cx).await.unwrap();
        assert!(!update.plan_runtime.unwrap().replan_requested);
    }

    #[tokio::test]
    async fn partial_success_never_replans() {
        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "search and draw");
        let ok_task = kb_task();
        let bad_task = kb_task();
        state
            .tool_outputs
            .insert(ok_task.id.clone(), ToolResult::ok(&ok_task.id, "kb_rag", serde_json::json!({})));
        state
            .tool_outputs
            .insert(bad_task.id.clone(), ToolResult::fail(&bad_task.id, "kb_rag", "x"));
        state.tasks = vec![ok_task, bad_task];
        state.plan_runtime.max_iterations = 2;

        let update = ReflectNode.run(&state, &cx).await.unwrap();
        let runtime = update.plan_runtime.unwrap();
        assert!(!runtime.replan_requested);
        assert_eq!(runtime.success_count, 1);
        assert_eq!(runtime.failed_count, 1);
    }
}
