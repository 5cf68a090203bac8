//! Meta blocks around the run: the pre-run "initial" acknowledgement
//! block streamed on likely tool turns, and the post-run conclusion
//! block carrying the checker summary.

use std::sync::Arc;

use futures_util::StreamExt;
use regex::Regex;
use serde_json::json;

use mf_domain::config::Config;
use mf_domain::event::EventType;
use mf_domain::state::CheckerSummary;
use mf_providers::{InvokeRequest, ProviderRegistry};

use crate::bus::Emitter;

pub const META_INITIAL_ID: &str = "__meta_initial__";
pub const META_CONCLUSION_ID: &str = "__meta_conclusion__";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Likely-tool-turn detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A turn that will probably fan out into tool lanes: it carries
/// attachments, or pairs an action verb with a tool noun.
pub fn likely_tool_turn(text: &str, has_attachments: bool) -> bool {
    if has_attachments {
        return true;
    }
    let t = text.to_lowercase();
    let has_action = ["generate", "create", "make", "search", "find", "upload"]
        .iter()
        .any(|k| t.contains(k));
    let has_tool = [
        "image", "audio", "voice", "tts", "pdf", "document", "doc", "txt", "web", "arxiv", "rag",
    ]
    .iter()
    .any(|k| t.contains(k));
    has_action && has_tool
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted plan summary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn boundary_re() -> Regex {
    Regex::new(
        r"(?i)(?:\s*,|\s*[.;:]\s*|\s+and\s+|\s+also\s+|\s+then\s+)\s*(?:generate|create|make|explain|tell|write|summarize|what is)\b",
    )
    .expect("static regex")
}

fn find_clause(text: &str, patterns: &[&str]) -> String {
    for p in patterns {
        let re = Regex::new(p).expect("static regex");
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                let raw = m.as_str();
                let clause = match boundary_re().find(raw) {
                    Some(b) => &raw[..b.start()],
                    None => raw,
                };
                let clause = clause.trim_matches(|c: char| " ,.;:-\"'".contains(c));
                if !clause.is_empty() {
                    return clause.to_string();
                }
            }
        }
    }
    String::new()
}

fn dedupe_ordered(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.trim().to_lowercase()))
        .collect()
}

/// Build the scripted "Sure, working on this now" sentence from the
/// extractable clauses, or empty when nothing matched.
pub fn scripted_summary(user_text: &str) -> String {
    let explain = find_clause(
        user_text,
        &[r"(?i)(?:explain|tell me about|what is|summarize|write(?:\s+a)?\s+story about)\s+(.+)$"],
    );
    let doc = find_clause(
        user_text,
        &[r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:pdf|document|docx?|txt|text file)(?:\s+on|\s+about|\s+for)?\s+(.+)$"],
    );
    let audio = find_clause(
        user_text,
        &[r"(?i)(?:generate|create|make)\s+audio(?:\s+for|\s+saying|\s+of)?\s+(.+)$"],
    );
    let image = find_clause(
        user_text,
        &[r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:image|picture|photo)(?:\s+for|\s+of)?\s+(.+)$"],
    );
    let news = find_clause(
        user_text,
        &[
            r"(?i)(?:tell me|show|give me|find|search)\s+(?:about\s+)?(?:top\s+\d+\s+)?(?:latest|recent|current)\s+(.+)$",
            r"(?i)(?:latest|recent|current)\s+(.+news.*)$",
        ],
    );
    let arxiv = find_clause(
        user_text,
        &[r"(?i)(?:arxiv|papers?|research(?: papers?)?)\s+(?:on|about|for)?\s+(.+)$"],
    );

    let mut parts = Vec::new();
    let mut labels = Vec::new();
    if !explain.is_empty() {
        parts.push(format!("explain \"{explain}\""));
        labels.push("text explanation".to_string());
    }
    if !doc.is_empty() {
        parts.push(format!("create a document on \"{doc}\""));
        labels.push("document".to_string());
    }
    if !audio.is_empty() {
        parts.push(format!("generate audio for \"{audio}\""));
        labels.push("audio".to_string());
    }
    if !image.is_empty() {
        parts.push(format!("generate an image for \"{image}\""));
        labels.push("image".to_string());
    }
    if !arxiv.is_empty() {
        parts.push(format!("fetch arxiv papers on \"{arxiv}\""));
        labels.push("arxiv research".to_string());
    } else if !news.is_empty() {
        parts.push(format!("fetch recent news on \"{news}\""));
        labels.push("news summary".to_string());
    }

    if parts.is_empty() {
        return String::new();
    }
    let parts = dedupe_ordered(parts);
    let labels = dedupe_ordered(labels);

    let summary = if labels.len() > 1 {
        format!("{}, and {}", labels[..labels.len() - 1].join(", "), labels[labels.len() - 1])
    } else {
        labels[0].clone()
    };

    let capitalize = |s: &str| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };
    let actions: Vec<String> = parts.iter().map(|p| capitalize(p)).collect();
    let flow = match actions.len() {
        1 => actions[0].clone(),
        2 => format!("{}, then {}", actions[0], actions[1]),
        _ => format!(
            "{}, and finally {}",
            actions[..actions.len() - 1].join(", then "),
            actions[actions.len() - 1]
        ),
    };

    format!("Sure, working on this now; I'll produce {summary}: {flow}.")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Initial meta block
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the `__meta_initial__` block: scripted sentence word by word
/// when extractable, otherwise a short model acknowledgement, with a
/// fixed fallback. Always closes the block.
pub async fn stream_initial_block(
    emitter: &Emitter,
    user_text: &str,
    provider: &str,
    model: &str,
    config: &Arc<Config>,
    registry: &Arc<ProviderRegistry>,
) {
    if !config.pacing.initial_start_delay.is_zero() {
        tokio::time::sleep(config.pacing.initial_start_delay).await;
    }

    emitter
        .emit(
            EventType::BlockStart,
            json!({"block_id": META_INITIAL_ID, "title": "Initial", "kind": "meta_initial"}),
        )
        .await;

    let scripted = scripted_summary(user_text);
    let delay = config.pacing.initial_token_delay;
    let mut text = String::new();

    if !scripted.is_empty() {
        let words: Vec<&str> = scripted.split(' ').collect();
        for (i, word) in words.iter().enumerate() {
            let tok = if i < words.len() - 1 {
                format!("{word} ")
            } else {
                (*word).to_string()
            };
            text.push_str(&tok);
            emitter
                .emit(EventType::BlockToken, json!({"block_id": META_INITIAL_ID, "text": tok}))
                .await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    } else {
        let (p, m) = config.routing.planner(provider, model);
        let prompt = format!(
            "Write one short sentence acknowledging requested tool outputs.\n\
             No markdown, no bullets, no quotes.\nUSER:\n{user_text}\n"
        );
        let streamed = async {
            let client = registry.client(&p, &m)?;
            client.stream(&InvokeRequest::new(prompt, 0.2)).await
        }
        .await;

        match streamed {
            Ok(mut stream) => {
                while let Some(delta) = stream.next().await {
                    match delta {
                        Ok(tok) if !tok.is_empty() => {
                            text.push_str(&tok);
                            emitter
                                .emit(
                                    EventType::BlockToken,
                                    json!({"block_id": META_INITIAL_ID, "text": tok}),
                                )
                                .await;
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "initial meta model unavailable, using fallback");
            }
        }
        if text.trim().is_empty() {
            text = "Working on your request now.".into();
            emitter
                .emit(
                    EventType::BlockToken,
                    json!({"block_id": META_INITIAL_ID, "text": text}),
                )
                .await;
        }
    }

    let final_text = if text.trim().is_empty() {
        "Working on your request now.".to_string()
    } else {
        text.trim().to_string()
    };
    emitter
        .emit(
            EventType::BlockEnd,
            json!({
                "block_id": META_INITIAL_ID,
                "payload": {
                    "ok": true,
                    "kind": "meta_initial",
                    "data": {"text": final_text, "mime": "text/markdown"},
                },
            }),
        )
        .await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conclusion block
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emit the `__meta_conclusion__` block pair carrying the checker
/// summary.
pub async fn emit_conclusion_block(emitter: &Emitter, checker: &CheckerSummary) {
    emitter
        .emit(
            EventType::BlockStart,
            json!({"block_id": META_CONCLUSION_ID, "title": "Conclusion", "kind": "meta_conclusion"}),
        )
        .await;
    emitter
        .emit(
            EventType::BlockEnd,
            json!({
                "block_id": META_CONCLUSION_ID,
                "payload": {
                    "ok": true,
                    "kind": "meta_conclusion",
                    "data": {
                        "text": "Completed. Results are shown above.",
                        "mime": "text/markdown",
                        "checker": checker,
                    },
                },
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_turn_detection_needs_action_and_tool() {
        assert!(likely_tool_turn("generate an image of a fox", false));
        assert!(likely_tool_turn("anything", true));
        assert!(!likely_tool_turn("explain monads", false));
        assert!(!likely_tool_turn("image", false));
    }

    #[test]
    fn scripted_summary_combines_clauses() {
        let s = scripted_summary("write a story about a phoenix and generate an image of a phoenix");
        assert!(s.starts_with("Sure, working on this now"));
        assert!(s.contains("text explanation"));
        assert!(s.contains("image"));
        assert!(s.contains("a phoenix"));
    }

    #[test]
    fn scripted_summary_empty_when_no_clause_matches() {
        assert_eq!(scripted_summary("hi"), "");
    }

    #[test]
    fn arxiv_clause_beats_news_clause() {
        let s = scripted_summary("find me recent arxiv papers on llm alignment");
        assert!(s.contains("arxiv research"));
        assert!(!s.contains("news summary"));
    }
}
