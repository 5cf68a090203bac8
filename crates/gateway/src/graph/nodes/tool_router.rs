//! Tool router: materialize the concrete task list from the plan
//! flags, extract per-lane clauses from the user text, and strip the
//! matched tool clauses out of the text query the synthesizer answers.

use regex::Regex;

use mf_domain::error::Result;
use mf_domain::plan::WebSource;
use mf_domain::state::{RunState, StateUpdate};
use mf_domain::task::{DocFormat, DocInstruction, ImageSize, Task, TaskSpec};
use mf_lanes::tavily::is_news_query;

use crate::graph::nodes::context::IMAGE_EDIT_CUES;
use crate::graph::runner::Node;
use crate::graph::GraphCx;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clause extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Boundary where the next chained action begins ("..., and generate",
/// "... then explain"). Captured clauses stop here.
fn next_action_re() -> Regex {
    Regex::new(
        r"(?i)(?:\s*,|\s+and\s+|\s+also\s+|\s+then\s+)\s*(?:generate|create|make|explain|tell|write|summarize|what is)\b",
    )
    .expect("static regex")
}

fn truncate_at_next_action(s: &str) -> &str {
    match next_action_re().find(s) {
        Some(m) => &s[..m.start()],
        None => s,
    }
}

fn clean_clause(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| ",.;:-".contains(c))
        .trim()
        .trim_matches(|c: char| "\"'".contains(c))
        .trim()
        .to_string()
}

/// Try each pattern; the first non-empty capture (truncated at the
/// next chained action) wins.
fn find_clause(text: &str, patterns: &[&str]) -> String {
    for p in patterns {
        let re = Regex::new(p).expect("static regex");
        if let Some(caps) = re.captures(text) {
            if let Some(m) = caps.get(1) {
                let clause = clean_clause(truncate_at_next_action(m.as_str()));
                if !clause.is_empty() {
                    return clause;
                }
            }
        }
    }
    String::new()
}

fn extract_quoted(text: &str) -> String {
    let s = text.trim();
    for q in ['"', '\''] {
        if let (Some(i), Some(j)) = (s.find(q), s.rfind(q)) {
            if j > i {
                let inner = s[i + 1..j].trim();
                if !inner.is_empty() {
                    return inner.to_string();
                }
            }
        }
    }
    s.to_string()
}

fn strip_prefixes(text: &str, prefixes: &[&str]) -> String {
    let s = text.trim();
    let low = s.to_lowercase();
    for p in prefixes {
        if low.starts_with(p) {
            return s[p.len()..].trim_matches(|c: char| " :.-".contains(c)).to_string();
        }
    }
    s.to_string()
}

/// Remove matched tool clauses from the user text, leaving the part
/// the synthesizer should answer.
pub fn remove_tool_clauses(text: &str) -> String {
    let clause_patterns = [
        r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:image|picture|photo)(?:\s+for|\s+of)?\s+",
        r"(?i)(?:generate|create|make)\s+audio(?:\s+for|\s+saying|\s+of)?\s+",
        r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:pdf|document|docx?|txt|text file)(?:\s+on|\s+about|\s+for)?\s+",
    ];

    let mut s = text.to_string();
    for p in clause_patterns {
        let re = Regex::new(p).expect("static regex");
        while let Some(m) = re.find(&s) {
            let tail = &s[m.end()..];
            let clause_end = match next_action_re().find(tail) {
                Some(b) => m.end() + b.start(),
                None => s.len(),
            };
            s.replace_range(m.start()..clause_end, " ");
        }
    }

    let s = Regex::new(r"(?i)\b(and|also|then)\b")
        .expect("static regex")
        .replace_all(&s, " ");
    let s = Regex::new(r"\s+").expect("static regex").replace_all(&s, " ");
    s.trim_matches(|c: char| " ,.;:-".contains(c)).to_string()
}

/// Infer the output format from format cue words, defaulting to txt.
pub fn doc_format_from_text(text: &str) -> DocFormat {
    let s = text.to_lowercase();
    if s.contains("pdf") {
        DocFormat::Pdf
    } else if s.contains("docx") || s.contains("word") || s.contains(" ms doc") || s.contains(" ms-doc") || s.contains(" .doc") {
        DocFormat::Doc
    } else if s.contains("txt") || s.contains("text file") || s.contains("plain text") {
        DocFormat::Txt
    } else if s.contains("markdown") || format!(" {s} ").contains(" md ") {
        DocFormat::Md
    } else {
        DocFormat::Txt
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRouterNode;

impl ToolRouterNode {
    /// Build the full task list from the plan flags and user text.
    pub fn route(state: &RunState) -> (Vec<Task>, String) {
        let flags = state.plan.flags;
        let user_text = state.user_text.as_str();
        let user_l = user_text.to_lowercase();
        let mut tasks: Vec<Task> = Vec::new();
        let text_query = remove_tool_clauses(user_text);

        if flags.needs_web {
            let src = state.plan.web_source.unwrap_or(WebSource::Tavily);
            let mut sources = vec![src];
            if src == WebSource::Tavily && !is_news_query(user_text) {
                sources.push(WebSource::Wikipedia);
            }
            tasks.push(Task::new(TaskSpec::Web {
                query: user_text.to_string(),
                top_k: 5,
                sources,
            }));
        }

        if flags.needs_rag {
            tasks.push(Task::new(TaskSpec::Rag {
                query: user_text.to_string(),
                top_k: 5,
            }));
        }
        if flags.needs_kb_rag {
            tasks.push(Task::new(TaskSpec::KbRag {
                query: user_text.to_string(),
                top_k: 6,
            }));
        }

        // Image generation, including prompt rewriting for edits.
        let linked_prompt = state
            .linked_artifact
            .as_ref()
            .filter(|l| l.kind == mf_domain::state::ArtifactKind::Image)
            .map(|l| l.prompt.trim().to_string())
            .unwrap_or_default();
        let last_image_prompt = state.last_image_prompt.clone().unwrap_or_default();
        let edit_cue = IMAGE_EDIT_CUES.iter().any(|c| user_l.contains(c));
        let wants_image_edit = (state.intent.intent_type == mf_domain::state::IntentType::Edit
            && state.intent.target_modality.contains("image"))
            || (!linked_prompt.is_empty() && edit_cue)
            || (!last_image_prompt.is_empty() && edit_cue);

        if flags.needs_image_gen || wants_image_edit {
            let mut prompt = find_clause(
                user_text,
                &[
                    r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:image|picture|photo)(?:\s+for|\s+of)?\s+(.+)$",
                    r"(?i)(?:image|picture|photo)\s+of\s+(.+)$",
                ],
            );
            if prompt.is_empty() {
                prompt = extract_quoted(&strip_prefixes(
                    user_text,
                    &[
                        "generate image for",
                        "create image for",
                        "make image for",
                        "image for",
                        "generate an image for",
                    ],
                ));
            }
            if wants_image_edit {
                let base_prompt = if !linked_prompt.is_empty() {
                    linked_prompt
                } else {
                    last_image_prompt
                };
                prompt = format!(
                    "{base_prompt}\n\nApply this edit request: {user_text}\n\
                     Keep the same main subject unless the user explicitly changes it."
                );
            }
            tasks.push(Task::new(TaskSpec::ImageGen {
                prompt,
                size: ImageSize::Square1024,
                subject_lock: state.plan_runtime.subject_lock.clone(),
            }));
        }

        if flags.needs_tts {
            let explicit = ["audio", "voice", "tts", "speak", "read aloud", "narrate"]
                .iter()
                .any(|k| user_l.contains(k));
            let mut text = find_clause(
                user_text,
                &[
                    r"(?i)(?:generate|create|make)\s+audio(?:\s+for|\s+saying|\s+of)?\s+(.+)$",
                    r"(?i)(?:say|speak)\s+(.+)$",
                ],
            );
            if text.is_empty() {
                text = extract_quoted(&strip_prefixes(
                    user_text,
                    &["generate audio for", "create audio for", "make audio for", "audio for", "say", "speak"],
                ));
            }
            if explicit && !text.is_empty() {
                tasks.push(Task::new(TaskSpec::Tts {
                    text,
                    voice: "alloy".into(),
                }));
            }
        }

        if flags.needs_doc {
            let doc_attachment = state
                .attachments
                .iter()
                .find(|a| a.kind == mf_domain::state::ArtifactKind::Doc);
            match doc_attachment {
                Some(att) => tasks.push(Task::new(TaskSpec::Doc {
                    instruction: DocInstruction::Extract,
                    attachment_id: Some(att.id.clone()),
                    prompt: None,
                    format: doc_format_from_text(user_text),
                })),
                None => {
                    let mut prompt = find_clause(
                        user_text,
                        &[
                            r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:pdf|document|docx?|txt|text file)(?:\s+on|\s+about|\s+for)?\s+(.+)$",
                            r"(?i)(?:doc|document)\s+about\s+(.+)$",
                        ],
                    );
                    if prompt.is_empty() {
                        prompt = extract_quoted(&strip_prefixes(
                            user_text,
                            &["generate a doc about", "create a doc about", "make a doc about", "doc about"],
                        ));
                    }
                    tasks.push(Task::new(TaskSpec::Doc {
                        instruction: DocInstruction::Generate,
                        attachment_id: None,
                        prompt: Some(prompt),
                        format: doc_format_from_text(user_text),
                    }));
                }
            }
        }

        // Safety net: an explicit generation/export ask always yields a
        // doc task even when the flag was missed.
        let explicit_doc_request = ["pdf", "document", "docx", "text file", "txt", "markdown", " md "]
            .iter()
            .any(|k| user_l.contains(k))
            && ["generate", "create", "make", "write", "export"].iter().any(|k| user_l.contains(k));
        let has_doc_task = tasks.iter().any(|t| t.kind() == "doc");
        if explicit_doc_request && !has_doc_task {
            let mut prompt = find_clause(
                user_text,
                &[r"(?i)(?:pdf|document|docx?|txt|text file)(?:\s+on|\s+about|\s+for)?\s+(.+)$"],
            );
            if prompt.is_empty() {
                prompt = extract_quoted(user_text);
            }
            if prompt.is_empty() {
                prompt = user_text.to_string();
            }
            tasks.push(Task::new(TaskSpec::Doc {
                instruction: DocInstruction::Generate,
                attachment_id: None,
                prompt: Some(prompt),
                format: doc_format_from_text(user_text),
            }));
        }

        if flags.needs_vision {
            if let Some(img) = state
                .attachments
                .iter()
                .find(|a| a.kind == mf_domain::state::ArtifactKind::Image)
            {
                tasks.push(Task::new(TaskSpec::Vision {
                    prompt: user_text.to_string(),
                    image_attachment_id: img.id.clone(),
                }));
            }
        }

        (tasks, text_query)
    }
}

#[async_trait::async_trait]
impl Node for ToolRouterNode {
    fn name(&self) -> &'static str {
        "tool_router"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let (tasks, text_query) = Self::route(state);
        let kinds: Vec<&str> = tasks.iter().map(|t| t.kind()).collect();
        let note = serde_json::json!({"task_kinds": kinds, "count": tasks.len()});

        Ok(StateUpdate {
            tasks: Some(tasks),
            text_query: Some(text_query),
            ..Default::default()
        }
        .note("tool_router", "Tool lanes selected", note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::plan::{PlanFlags, PlanMode};
    use mf_domain::state::{ArtifactKind, Intent, IntentType, LinkedArtifact};

    fn state_with_flags(user_text: &str, flags: PlanFlags) -> RunState {
        let mut state = RunState::new("s1", "r1", user_text);
        state.plan.flags = flags;
        state.plan.mode = PlanMode::TextPlusTools;
        state
    }

    #[test]
    fn clause_truncates_at_next_action() {
        let clause = find_clause(
            "generate an image of a phoenix and explain transformers",
            &[r"(?i)(?:generate|create|make)\s+(?:an?\s+)?(?:image|picture|photo)(?:\s+for|\s+of)?\s+(.+)$"],
        );
        assert_eq!(clause, "a phoenix");
    }

    #[test]
    fn tool_clauses_are_stripped_from_text_query() {
        let q = remove_tool_clauses(
            "write a 5-line story about a phoenix and generate a picture of a phoenix",
        );
        assert!(q.contains("story about a phoenix"));
        assert!(!q.to_lowercase().contains("generate a picture"));
    }

    #[test]
    fn doc_format_cues() {
        assert_eq!(doc_format_from_text("make a pdf about rust"), DocFormat::Pdf);
        assert_eq!(doc_format_from_text("export a docx please"), DocFormat::Doc);
        assert_eq!(doc_format_from_text("write a markdown doc"), DocFormat::Md);
        assert_eq!(doc_format_from_text("make a doc"), DocFormat::Txt);
    }

    #[test]
    fn web_task_adds_wikipedia_for_non_news() {
        let mut state = state_with_flags(
            "search the web for rust ownership",
            PlanFlags {
                needs_web: true,
                ..Default::default()
            },
        );
        state.plan.web_source = Some(WebSource::Tavily);

        let (tasks, _) = ToolRouterNode::route(&state);
        assert_eq!(tasks.len(), 1);
        match &tasks[0].spec {
            TaskSpec::Web { sources, .. } => {
                assert_eq!(sources, &vec![WebSource::Tavily, WebSource::Wikipedia]);
            }
            other => panic!("expected web task, got {other:?}"),
        }
    }

    #[test]
    fn news_query_stays_tavily_only() {
        let mut state = state_with_flags(
            "latest AI news today",
            PlanFlags {
                needs_web: true,
                ..Default::default()
            },
        );
        state.plan.web_source = Some(WebSource::Tavily);

        let (tasks, _) = ToolRouterNode::route(&state);
        match &tasks[0].spec {
            TaskSpec::Web { sources, .. } => assert_eq!(sources, &vec![WebSource::Tavily]),
            other => panic!("expected web task, got {other:?}"),
        }
    }

    #[test]
    fn image_edit_prepends_previous_prompt() {
        let mut state = state_with_flags("make the background red", PlanFlags::default());
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
        state.plan_runtime.subject_lock = Some("a minimal owl logo".into());

        let (tasks, _) = ToolRouterNode::route(&state);
        assert_eq!(tasks.len(), 1);
        match &tasks[0].spec {
            TaskSpec::ImageGen { prompt, subject_lock, .. } => {
                assert!(prompt.starts_with("a minimal owl logo"));
                assert!(prompt.contains("Apply this edit request: make the background red"));
                assert_eq!(subject_lock.as_deref(), Some("a minimal owl logo"));
            }
            other => panic!("expected image task, got {other:?}"),
        }
    }

    #[test]
    fn tts_requires_explicit_audio_ask() {
        let state = state_with_flags(
            "generate audio for hello world",
            PlanFlags {
                needs_tts: true,
                ..Default::default()
            },
        );
        let (tasks, _) = ToolRouterNode::route(&state);
        assert_eq!(tasks.len(), 1);
        match &tasks[0].spec {
            TaskSpec::Tts { text, voice } => {
                assert_eq!(text, "hello world");
                assert_eq!(voice, "alloy");
            }
            other => panic!("expected tts task, got {other:?}"),
        }

        // Flag set but no audio wording in the text: no task.
        let state = state_with_flags(
            "tell me a joke",
            PlanFlags {
                needs_tts: true,
                ..Default::default()
            },
        );
        let (tasks, _) = ToolRouterNode::route(&state);
        assert!(tasks.is_empty());
    }

    #[test]
    fn doc_attachment_routes_to_extract() {
        let mut state = state_with_flags(
            "pull the text out of my pdf",
            PlanFlags {
                needs_doc: true,
                ..Default::default()
            },
        );
        state.attachments.push(mf_domain::state::Attachment {
            id: "d1".into(),
            kind: ArtifactKind::Doc,
            name: "report.pdf".into(),
            mime: "application/pdf".into(),
            path: "/tmp/report.pdf".into(),
        });

        let (tasks, _) = ToolRouterNode::route(&state);
        match &tasks[0].spec {
            TaskSpec::Doc { instruction, attachment_id, .. } => {
                assert_eq!(*instruction, DocInstruction::Extract);
                assert_eq!(attachment_id.as_deref(), Some("d1"));
            }
            other => panic!("expected doc task, got {other:?}"),
        }
    }

    #[test]
    fn explicit_doc_request_safety_net() {
        // Flags missed the doc ask entirely.
        let state = state_with_flags("please create a pdf about rust async", PlanFlags::default());
        let (tasks, _) = ToolRouterNode::route(&state);
        assert_eq!(tasks.len(), 1);
        match &tasks[0].spec {
            TaskSpec::Doc { instruction, format, .. } => {
                assert_eq!(*instruction, DocInstruction::Generate);
                assert_eq!(*format, DocFormat::Pdf);
            }
            other => panic!("expected doc task, got {other:?}"),
        }
    }

    #[test]
    fn vision_needs_an_image_attachment() {
        let state = state_with_flags(
            "describe this image",
            PlanFlags {
                needs_vision: true,
                ..Default::default()
            },
        );
        let (tasks, _) = ToolRouterNode::route(&state);
        assert!(tasks.is_empty());
    }
}
