//! Task validation: dedupe by `(kind, anchor)`, clamp `top_k`, and
//! apply the pure-image-generation guardrail.

use regex::Regex;

use mf_domain::error::Result;
use mf_domain::state::{RunState, StateUpdate};
use mf_domain::task::{Task, TaskSpec};

use crate::graph::runner::Node;
use crate::graph::GraphCx;

const TOP_K_MIN: usize = 1;
const TOP_K_MAX: usize = 8;

fn clamp_top_k(k: usize) -> usize {
    k.clamp(TOP_K_MIN, TOP_K_MAX)
}

fn task_key(task: &Task) -> (String, String) {
    (task.kind().to_string(), task.anchor().trim().to_lowercase())
}

/// Validate, dedupe, and guard the task list. Returns the surviving
/// tasks and the number dropped.
pub fn validate_tasks(tasks: Vec<Task>, user_text: &str) -> (Vec<Task>, usize) {
    let user_l = user_text.to_lowercase();

    let explicit_image_gen = Regex::new(
        r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:image|picture|photo)\b|(?:image|picture|photo)\s+of\b",
    )
    .expect("static regex")
    .is_match(&user_l);
    let explicit_web_ask = [
        "web", "internet", "online", "news", "headline", "headlines", "search", "arxiv", "paper", "research",
    ]
    .iter()
    .any(|k| user_l.contains(k));
    let explicit_text_ask = [
        "explain", "describe", "summarize", "summary", "tell me", "what is", "why", "how",
    ]
    .iter()
    .any(|k| user_l.contains(k));

    let mut seen = std::collections::HashSet::new();
    let mut cleaned: Vec<Task> = Vec::new();
    let mut dropped = 0usize;

    for mut task in tasks {
        let key = task_key(&task);
        if !seen.insert(key) {
            dropped += 1;
            continue;
        }
        match &mut task.spec {
            TaskSpec::Web { top_k, .. } | TaskSpec::Rag { top_k, .. } | TaskSpec::KbRag { top_k, .. } => {
                *top_k = clamp_top_k(*top_k);
            }
            _ => {}
        }
        cleaned.push(task);
    }

    // A pure image-generation ask must not pull retrieval lanes.
    if explicit_image_gen && !explicit_web_ask && !explicit_text_ask {
        let has_image_gen = cleaned.iter().any(|t| t.kind() == "image_gen");
        if has_image_gen {
            let before = cleaned.len();
            cleaned.retain(|t| !matches!(t.kind(), "web" | "rag" | "kb_rag"));
            dropped += before - cleaned.len();
        }
    }

    (cleaned, dropped)
}

pub struct TaskValidateNode;

#[async_trait::async_trait]
impl Node for TaskValidateNode {
    fn name(&self) -> &'static str {
        "task_validate"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let input = state.tasks.len();
        let (cleaned, dropped) = validate_tasks(state.tasks.clone(), &state.user_text);
        let note = serde_json::json!({"input": input, "output": cleaned.len(), "dropped": dropped});

        Ok(StateUpdate {
            tasks: Some(cleaned),
            ..Default::default()
        }
        .note("task_validate", "Tasks validated", note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::plan::WebSource;
    use mf_domain::task::ImageSize;

    fn web_task(query: &str, top_k: usize) -> Task {
        Task::new(TaskSpec::Web {
            query: query.into(),
            top_k,
            sources: vec![WebSource::Tavily],
        })
    }

    #[test]
    fn duplicate_kind_anchor_pairs_collapse() {
        let tasks = vec![web_task("rust news", 5), web_task("Rust News", 5), web_task("other", 5)];
        let (cleaned, dropped) = validate_tasks(tasks, "rust news");
        assert_eq!(cleaned.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn top_k_clamped_to_range() {
        let (cleaned, _) = validate_tasks(vec![web_task("q", 99), web_task("r", 0)], "search");
        for task in &cleaned {
            match &task.spec {
                TaskSpec::Web { top_k, .. } => assert!((1..=8).contains(top_k)),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn pure_image_ask_drops_retrieval_lanes() {
        let tasks = vec![
            Task::new(TaskSpec::ImageGen {
                prompt: "a phoenix".into(),
                size: ImageSize::Square1024,
                subject_lock: None,
            }),
            web_task("a phoenix", 5),
            Task::new(TaskSpec::KbRag {
                query: "a phoenix".into(),
                top_k: 6,
            }),
        ];
        let (cleaned, dropped) = validate_tasks(tasks, "generate an image of a phoenix");
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].kind(), "image_gen");
        assert_eq!(dropped, 2);
    }

    #[test]
    fn image_plus_explicit_text_keeps_lanes() {
        let tasks = vec![
            Task::new(TaskSpec::ImageGen {
                prompt: "a phoenix".into(),
                size: ImageSize::Square1024,
                subject_lock: None,
            }),
            web_task("phoenix mythology", 5),
        ];
        let (cleaned, _) =
            validate_tasks(tasks, "explain phoenix mythology and generate an image of a phoenix");
        assert_eq!(cleaned.len(), 2);
    }
}
