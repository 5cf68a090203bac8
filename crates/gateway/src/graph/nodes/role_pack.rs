//! Role-pack node: a compact researcher/writer/critic contract for
//! the synthesizer. Media-only turns take a fixed fast path; other
//! turns ask a small planner model, falling back to fixed defaults on
//! any failure.

use mf_domain::error::Result;
use mf_domain::state::{ResponseContract, RunState, StateUpdate};
use mf_providers::jsonx::extract_json;
use mf_providers::InvokeRequest;

use crate::graph::runner::Node;
use crate::graph::GraphCx;

const ROLE_SYSTEM_PROMPT: &str = "You are a fast planning assistant for response composition.\n\
Return compact, actionable planning signals only.\n\
Be concise, grounded, and avoid unnecessary verbosity.\n";

const DEFAULT_RESEARCHER: &str =
    "- Prioritize directly relevant evidence.\n- Resolve entity ambiguity.\n- Keep concise and grounded.";
const DEFAULT_WRITER: &str =
    "Answer directly with strongest evidence first; keep concise; avoid unsupported claims.";
const DEFAULT_CRITIC: &str =
    "- Risk: unsupported claims\n- Risk: entity mix-up\nRule: only state what retrieved evidence supports.";

/// True when every planned task is a media lane (doc/image/audio).
pub fn media_only(kinds: &[&str]) -> bool {
    !kinds.is_empty() && kinds.iter().all(|k| matches!(*k, "doc" | "image_gen" | "tts"))
}

pub struct RolePackNode;

#[async_trait::async_trait]
impl Node for RolePackNode {
    fn name(&self) -> &'static str {
        "role_pack"
    }

    async fn run(&self, state: &RunState, cx: &GraphCx) -> Result<StateUpdate> {
        let user = state.user_text.trim();
        let mut contract = state.response_contract.clone();
        if user.is_empty() {
            return Ok(StateUpdate {
                response_contract: Some(contract),
                ..Default::default()
            });
        }

        let kinds: Vec<&str> = state.tasks.iter().map(|t| t.kind()).collect();

        // Media-only turns skip the planner model to keep pre-stream
        // latency low.
        if media_only(&kinds) {
            contract.researcher_brief = "Prioritize the user's direct explanation request.".into();
            contract.writer_plan = "Answer succinctly in markdown. Do not mention tool execution status.".into();
            contract.critic_checks = "Avoid unsupported claims; keep response concise.".into();
            return Ok(StateUpdate {
                response_contract: Some(contract),
                ..Default::default()
            }
            .note(
                "role_pack",
                "Role pack fast-path for media-only tasks",
                serde_json::json!({"tasks": kinds}),
            ));
        }

        let (role_provider, role_model) = cx.config.routing.role_pack(&cx.provider, &cx.model);
        let prompt = format!(
            "You are producing a compact collaboration contract for a response engine.\n\
             Return ONLY JSON with keys: researcher_brief, writer_plan, critic_checks.\n\
             - researcher_brief: max 3 bullets\n\
             - writer_plan: max 6 lines\n\
             - critic_checks: max 3 risks + 1 corrective rule\n\n\
             User request: {user}\n\
             Intent: {:?}/{}\n\
             Planned task kinds: {:?}\n",
            state.intent.intent_type, state.intent.target_modality, kinds
        );

        let mut researcher = DEFAULT_RESEARCHER.to_string();
        let mut writer = DEFAULT_WRITER.to_string();
        let mut critic = DEFAULT_CRITIC.to_string();

        // Defaults survive any planner failure; the contract is an aid,
        // not a dependency.
        let outcome = async {
            let client = cx.registry.client(&role_provider, &role_model)?;
            let raw = client
                .invoke(&InvokeRequest::new(format!("{ROLE_SYSTEM_PROMPT}\n\n{prompt}"), 0.1))
                .await?;
            extract_json(&raw)
        }
        .await;

        if let Ok(data) = outcome {
            if let Some(v) = data.get("researcher_brief").and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    researcher = v.trim().to_string();
                }
            }
            if let Some(v) = data.get("writer_plan").and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    writer = v.trim().to_string();
                }
            }
            if let Some(v) = data.get("critic_checks").and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    critic = v.trim().to_string();
                }
            }
        }

        contract = ResponseContract {
            researcher_brief: researcher,
            writer_plan: writer,
            critic_checks: critic,
        };
        Ok(StateUpdate {
            response_contract: Some(contract),
            ..Default::default()
        }
        .note(
            "role_pack",
            "Role pack prepared",
            serde_json::json!({"tasks": kinds, "provider": role_provider, "model": role_model}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_only_detection() {
        assert!(media_only(&["image_gen"]));
        assert!(media_only(&["doc", "tts"]));
        assert!(!media_only(&["image_gen", "web"]));
        assert!(!media_only(&[]));
    }
}
