//! Context node: derive cheap facts about the turn before the
//! classifier runs — is there a previous image, and does the text read
//! like an edit of it?

use mf_domain::error::Result;
use mf_domain::state::{ArtifactKind, LinkedArtifact, ContextBundle, RunState, StateUpdate};

use crate::graph::runner::Node;
use crate::graph::GraphCx;

/// Phrases that mark a follow-up edit of the previous image.
pub const IMAGE_EDIT_CUES: [&str; 11] = [
    "add ",
    "replace ",
    "change ",
    "make it ",
    "but it",
    "not ",
    "fix ",
    "update ",
    "background",
    "foreground",
    "remove ",
];

pub fn is_image_edit(user_text: &str, has_last_image: bool) -> bool {
    if !has_last_image {
        return false;
    }
    let t = user_text.to_lowercase();
    IMAGE_EDIT_CUES.iter().any(|c| t.contains(c))
}

pub struct ContextNode;

#[async_trait::async_trait]
impl Node for ContextNode {
    fn name(&self) -> &'static str {
        "context"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let last_image = state.artifact_memory.image.clone();
        let has_last_image = last_image.is_some();
        let edit = is_image_edit(&state.user_text, has_last_image);

        let linked = if edit {
            last_image.map(|slot| LinkedArtifact {
                kind: ArtifactKind::Image,
                id: slot.id,
                prompt: slot.prompt_or_text,
                url: slot.url,
            })
        } else {
            None
        };

        Ok(StateUpdate {
            context_bundle: Some(ContextBundle {
                has_last_image,
                is_image_edit: edit,
            }),
            linked_artifact: Some(linked),
            ..Default::default()
        }
        .note(
            "context",
            "Context prepared",
            serde_json::json!({"has_last_image": has_last_image, "is_image_edit": edit}),
        ))
    }
}
