//! Runtime planner: iteration caps, replan budget, and the subject
//! lock for image edits.

use regex::Regex;

use mf_domain::error::Result;
use mf_domain::state::{ArtifactKind, IntentType, PlanRuntime, RunState, StateUpdate};

use crate::graph::runner::Node;
use crate::graph::GraphCx;

/// Extract a short subject from an image prompt: the tail of an
/// "image/photo/picture of X" phrase, a bare "of X" tail, or the last
/// three words.
pub fn extract_subject(prompt: &str) -> Option<String> {
    let s = prompt.trim();
    if s.is_empty() {
        return None;
    }

    let media_of = Regex::new(r"(?i)(?:image|photo|picture)\s+of\s+(.+)$").expect("static regex");
    if let Some(caps) = media_of.captures(s) {
        return Some(caps[1].trim_matches(|c: char| " .!?".contains(c)).to_string());
    }

    let bare_of = Regex::new(r"(?i)\bof\s+(.+)$").expect("static regex");
    if let Some(caps) = bare_of.captures(s) {
        return Some(caps[1].trim_matches(|c: char| " .!?".contains(c)).to_string());
    }

    let words: Vec<&str> = s.split_whitespace().collect();
    if words.is_empty() {
        None
    } else {
        Some(words[words.len().saturating_sub(3)..].join(" "))
    }
}

pub struct PlannerNode;

#[async_trait::async_trait]
impl Node for PlannerNode {
    fn name(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let intent = &state.intent;
        let is_image_edit =
            intent.intent_type == IntentType::Edit && intent.target_modality.contains("image");

        let subject_lock = if is_image_edit {
            state
                .linked_artifact
                .as_ref()
                .filter(|l| l.kind == ArtifactKind::Image)
                .and_then(|l| extract_subject(&l.prompt))
        } else {
            None
        };

        let has_tool_lanes = state.plan.flags.any_tool();
        let runtime = PlanRuntime {
            iteration: 0,
            max_iterations: if has_tool_lanes { 2 } else { 1 },
            max_replans: if is_image_edit { 1 } else { 0 },
            max_rewrites: 1,
            subject_lock,
            replan_requested: false,
            replan_reason: String::new(),
            success_count: 0,
            failed_count: 0,
        };

        let note = serde_json::json!({
            "intent_type": intent.intent_type,
            "target_modality": intent.target_modality,
            "confidence": intent.confidence,
        });
        Ok(StateUpdate {
            plan_runtime: Some(runtime),
            ..Default::default()
        }
        .note("planner", "Runtime plan prepared", note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_cx;
    use mf_domain::plan::PlanFlags;
    use mf_domain::state::{Intent, LinkedArtifact};

    #[test]
    fn subject_from_media_of_phrase() {
        assert_eq!(extract_subject("an image of a phoenix").as_deref(), Some("a phoenix"));
        assert_eq!(
            extract_subject("minimal photo of an owl logo.").as_deref(),
            Some("an owl logo")
        );
    }

    #[test]
    fn subject_falls_back_to_trailing_words() {
        assert_eq!(
            extract_subject("minimal flat vector owl").as_deref(),
            Some("flat vector owl")
        );
        assert_eq!(extract_subject(""), None);
    }

    #[tokio::test]
    async fn image_edit_gets_lock_and_replan_budget() {
        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "make the background red");
        state.intent = Intent {
            intent_type: IntentType::Edit,
            target_modality: "image".into(),
            confidence: 0.9,
        };
        state.linked_artifact = Some(LinkedArtifact {
            kind: ArtifactKind::Image,
            id: "o1".into(),
            prompt: "a minimal owl logo".into(),
            url: "/api/assets/s1/o1.png".into(),
        });
        state.plan.flags = PlanFlags {
            needs_image_gen: true,
            ..Default::default()
        };

        let update = PlannerNode.run(&state, &cx).await.unwrap();
        let runtime = update.plan_runtime.unwrap();
        assert_eq!(runtime.max_replans, 1);
        assert_eq!(runtime.max_iterations, 2);
        assert_eq!(runtime.max_rewrites, 1);
        assert_eq!(runtime.subject_lock.as_deref(), Some("a minimal owl logo"));
    }

    #[tokio::test]
    async fn chat_turn_gets_single_iteration() {
        let (cx, _rx) = test_cx().await;
        let state = RunState::new("s1", "r1", "hello there");
        let update = PlannerNode.run(&state, &cx).await.unwrap();
        let runtime = update.plan_runtime.unwrap();
        assert_eq!(runtime.max_iterations, 1);
        assert_eq!(runtime.max_replans, 0);
        assert!(runtime.subject_lock.is_none());
    }
}
