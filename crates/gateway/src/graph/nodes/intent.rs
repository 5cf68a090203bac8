//! Intent classifier node.
//!
//! A probabilistic LLM classification sandwiched between deterministic
//! rules: a greeting pre-rule bypasses the model entirely, and the
//! post-rules (cue words, attachment context, retrieval-forces-text,
//! mode derivation) always run on top of whatever the model returned.
//! The model is never the source of truth for routing.

use regex::Regex;
use serde_json::Value;

use mf_domain::error::Result;
use mf_domain::plan::{PlanFlags, PlanMode, RunPlan, TextPlan, WebSource};
use mf_domain::state::{Intent, IntentType, RunState, StateUpdate};
use mf_providers::jsonx::extract_json;
use mf_providers::registry::model_candidates;
use mf_providers::InvokeRequest;

use crate::graph::runner::Node;
use crate::graph::GraphCx;

const PLANNER_SYSTEM_PROMPT: &str = "You are a strict low-latency planner for a multimodal assistant.\n\
Priority: speed, correct tool routing, and valid JSON.\n\
Never include prose, markdown, comments, or extra keys.\n\
If uncertain, choose text_only with task ['text'].\n";

const ALLOWED_TASKS: [&str; 8] = [
    "text", "image", "document", "audio", "web", "rag", "arxiv", "kb_rag",
];

/// Greeting fast-path pattern.
pub fn greeting_regex() -> Regex {
    Regex::new(
        r"(?i)^\s*(hi|hello|hey|yo|sup|what'?s up|good\s+morning|good\s+afternoon|good\s+evening)[!. ]*$",
    )
    .expect("static regex")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic post-rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Facts the post-rules need about the turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnFacts {
    pub has_image_attachment: bool,
    pub has_doc_attachment: bool,
    pub has_memory_doc_text: bool,
    pub kb_corpus_exists: bool,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Normalize the model's task list: allowed set only, deduplicated.
pub fn sanitize_tasks(raw: &[Value]) -> Vec<String> {
    let mut tasks = Vec::new();
    for item in raw {
        let t = item.as_str().unwrap_or("").trim().to_lowercase();
        if !t.is_empty() && ALLOWED_TASKS.contains(&t.as_str()) && !tasks.contains(&t) {
            tasks.push(t);
        }
    }
    tasks
}

/// Apply every deterministic post-rule to the classified task list.
pub fn apply_post_rules(mut tasks: Vec<String>, user_text: &str, facts: TurnFacts) -> Vec<String> {
    let user_l = user_text.to_lowercase();
    let add = |tasks: &mut Vec<String>, t: &str| {
        if !tasks.iter().any(|x| x == t) {
            tasks.push(t.to_string());
        }
    };

    // Cue-word fallbacks: an explicit ask always gets its lane even if
    // the classifier missed it.
    let explicit_image = contains_any(
        &user_l,
        &["generate image", "create image", "make image", "image of", "picture of", "photo of"],
    );
    let explicit_audio = contains_any(
        &user_l,
        &["generate audio", "create audio", "make audio", "tts", "voice", "read aloud", "narrate", "speak "],
    );
    let explicit_doc = contains_any(&user_l, &["pdf", "document", "docx", "text file", "txt", "markdown"])
        && contains_any(&user_l, &["generate", "create", "make", "write", "export"]);
    let explicit_web = contains_any(
        &user_l,
        &["latest", "recent", "news", "headlines", "top ", "current", "today", "web", "internet", "search"],
    );
    let explicit_arxiv = contains_any(&user_l, &["arxiv", "paper", "papers", "preprint", "research paper"]);
    let explicit_kb = facts.kb_corpus_exists
        && contains_any(
            &user_l,
            &[
                "knowledge base",
                "knowledge-base",
                "employee",
                "employees",
                "company",
                "contract",
                "product",
                "carllm",
                "homellm",
                "markellm",
                "rellm",
            ],
        );
    let asks_text = greeting_regex().is_match(user_text)
        || contains_any(
            &user_l,
            &[
                "explain", "what is", "what's", "who is", "who's", "how ", "why ", "tell me",
                "summarize", "summary", "describe", "analysis", "analyze", "write", "story", "?",
            ],
        );

    if explicit_image {
        add(&mut tasks, "image");
    }
    if explicit_audio {
        add(&mut tasks, "audio");
    }
    if explicit_doc {
        add(&mut tasks, "document");
    }
    if explicit_arxiv {
        add(&mut tasks, "arxiv");
    }
    if explicit_web && !tasks.iter().any(|t| t == "arxiv") {
        add(&mut tasks, "web");
    }
    if explicit_kb {
        add(&mut tasks, "kb_rag");
    }
    if asks_text {
        add(&mut tasks, "text");
    }

    // An uploaded document plus a question about it routes to QA
    // (text + retrieval) instead of document generation.
    let has_doc_context = facts.has_doc_attachment || facts.has_memory_doc_text;
    let asks_doc_question = has_doc_context
        && contains_any(&user_l, &["document", "doc", "pdf", "file", "uploaded", "upload"])
        && contains_any(
            &user_l,
            &[
                "explain", "summarize", "summary", "what", "describe", "analyze", "analysis",
                "content", "contents", "tell me", "question",
            ],
        );
    let asks_doc_generation = contains_any(&user_l, &["generate", "create", "make", "write", "export"]);
    if asks_doc_question && !asks_doc_generation {
        tasks.retain(|t| t != "document");
        add(&mut tasks, "text");
        if facts.has_doc_attachment {
            add(&mut tasks, "rag");
        }
    }

    // An image attachment plus describe/analyze cues means vision.
    if facts.has_image_attachment
        && contains_any(
            &user_l,
            &["image", "photo", "picture", "attached", "this image", "what is in", "describe", "analyze", "caption"],
        )
    {
        add(&mut tasks, "image");
        add(&mut tasks, "text");
    }

    // Retrieval lanes always produce a textual synthesis.
    if tasks.iter().any(|t| matches!(t.as_str(), "web" | "arxiv" | "rag" | "kb_rag")) {
        add(&mut tasks, "text");
    }
    if tasks.is_empty() {
        tasks.push("text".into());
    }
    tasks
}

/// Derive flags, web source, and mode from the final task list.
pub fn derive_plan(tasks: &[String], has_image_attachment: bool) -> (PlanFlags, Option<WebSource>, PlanMode) {
    let has = |t: &str| tasks.iter().any(|x| x == t);

    let flags = PlanFlags {
        needs_web: has("web") || has("arxiv"),
        needs_rag: has("rag"),
        needs_kb_rag: has("kb_rag"),
        needs_doc: has("document"),
        needs_vision: has("image") && has_image_attachment,
        needs_tts: has("audio"),
        // Image generation is the complement of vision on the image task.
        needs_image_gen: has("image") && !has_image_attachment,
    };

    let web_source = if has("arxiv") {
        Some(WebSource::Arxiv)
    } else if has("web") {
        Some(WebSource::Tavily)
    } else {
        None
    };

    let non_text = tasks.iter().any(|t| t != "text");
    let mode = if has("text") && non_text {
        PlanMode::TextPlusTools
    } else if has("text") {
        PlanMode::TextOnly
    } else if !tasks.is_empty() {
        PlanMode::ToolsOnly
    } else {
        PlanMode::TextOnly
    };

    (flags, web_source, mode)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn classifier_prompt(user: &str, has_files: bool, has_last_image: bool) -> String {
    format!(
        "You are an intent classifier for a multimodal assistant.\n\
         Allowed capabilities: text, image, document, audio, web, rag, arxiv, kb_rag.\n\
         You MUST only use those capabilities and combinations of them.\n\
         Return ONLY valid JSON with exactly these keys:\n\
         {{\n\
           \"mode\": \"text_only\" | \"text_plus_tools\" | \"tools_only\",\n\
           \"tasks\": [\"text\"|\"image\"|\"document\"|\"audio\"|\"web\"|\"rag\"|\"arxiv\"|\"kb_rag\"],\n\
           \"confidence\": number,\n\
           \"intent_type\": \"create\"|\"edit\"|\"analyze\"|\"retrieve\"|\"chat\"\n\
         }}\n\
         Routing policy:\n\
         - Default to text_only with ['text'] for greetings/chat/simple Q&A.\n\
         - Add a non-text task ONLY when explicitly requested by the user.\n\
         - Do NOT infer audio from general explanation requests. Audio requires explicit ask for audio/voice/tts/speak/read aloud.\n\
         - Do NOT infer image from general explanation requests. Image requires explicit ask to create/generate/make image/photo/picture.\n\
         - Do NOT infer web/arxiv unless user explicitly asks web/news/internet/search/arxiv/papers/latest/current.\n\
         - Use 'arxiv' specifically for paper/preprint/arxiv requests.\n\
         - Use 'rag' only for questions over uploaded files/documents.\n\
         - Use 'kb_rag' only for organization KB lookup requests (company/employees/products/contracts) when user asks for that data.\n\
         - If user asks both explanation and a tool action, use text_plus_tools.\n\
         - For follow-up image edits with previous image context, choose image task.\n\
         - No extra keys, no prose.\n\
         Examples:\n\
         USER: \"hi\"\n\
         JSON: {{\"mode\":\"text_only\",\"tasks\":[\"text\"],\"confidence\":0.98,\"intent_type\":\"chat\"}}\n\
         USER: \"Explain RAG in bullets\"\n\
         JSON: {{\"mode\":\"text_only\",\"tasks\":[\"text\"],\"confidence\":0.93,\"intent_type\":\"analyze\"}}\n\
         USER: \"Explain RAG in bullets and generate audio for hello\"\n\
         JSON: {{\"mode\":\"text_plus_tools\",\"tasks\":[\"text\",\"audio\"],\"confidence\":0.93,\"intent_type\":\"create\"}}\n\
         USER: \"Generate a PDF about AI\"\n\
         JSON: {{\"mode\":\"tools_only\",\"tasks\":[\"document\"],\"confidence\":0.95,\"intent_type\":\"create\"}}\n\
         USER: \"latest AI papers from arxiv\"\n\
         JSON: {{\"mode\":\"tools_only\",\"tasks\":[\"arxiv\"],\"confidence\":0.92,\"intent_type\":\"retrieve\"}}\n\
         USER: \"write a phoenix story and also generate an image\"\n\
         JSON: {{\"mode\":\"text_plus_tools\",\"tasks\":[\"text\",\"image\"],\"confidence\":0.94,\"intent_type\":\"create\"}}\n\
         has_files={has_files}; has_last_image={has_last_image}\n\
         USER:\n{user}\n"
    )
}

fn parse_intent_type(raw: &str) -> IntentType {
    match raw {
        "create" => IntentType::Create,
        "edit" => IntentType::Edit,
        "analyze" => IntentType::Analyze,
        "retrieve" => IntentType::Retrieve,
        _ => IntentType::Chat,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct IntentNode;

impl IntentNode {
    /// Invoke the classifier, walking the candidate pair list on
    /// model-not-found errors.
    async fn classify(&self, prompt: &str, cx: &GraphCx) -> Result<Value> {
        let (planner_provider, planner_model) = cx.config.routing.planner(&cx.provider, &cx.model);

        let mut candidate_pairs: Vec<(String, String)> = vec![(planner_provider, planner_model)];
        for candidate in model_candidates(&cx.provider, &cx.model) {
            let pair = (cx.provider.clone(), candidate);
            if !candidate_pairs.contains(&pair) {
                candidate_pairs.push(pair);
            }
        }

        let full_prompt = format!("{PLANNER_SYSTEM_PROMPT}\n\n{prompt}");
        let last = candidate_pairs.len() - 1;
        let mut raw = String::new();
        for (idx, (p, m)) in candidate_pairs.iter().enumerate() {
            let client = cx.registry.client(p, m)?;
            match client.invoke(&InvokeRequest::new(full_prompt.clone(), 0.0)).await {
                Ok(text) => {
                    raw = text;
                    break;
                }
                Err(e) if idx < last && e.is_model_not_found() => {
                    tracing::warn!(provider = %p, model = %m, error = %e, "classifier model not found, trying next");
                }
                Err(e) => return Err(e),
            }
        }
        extract_json(&raw)
    }
}

#[async_trait::async_trait]
impl Node for IntentNode {
    fn name(&self) -> &'static str {
        "intent"
    }

    async fn run(&self, state: &RunState, cx: &GraphCx) -> Result<StateUpdate> {
        let user = state.user_text.clone();
        let facts = TurnFacts {
            has_image_attachment: state
                .attachments
                .iter()
                .any(|a| a.kind == mf_domain::state::ArtifactKind::Image),
            has_doc_attachment: state
                .attachments
                .iter()
                .any(|a| a.kind == mf_domain::state::ArtifactKind::Doc),
            has_memory_doc_text: state
                .artifact_memory
                .doc
                .as_ref()
                .map(|d| !d.prompt_or_text.trim().is_empty())
                .unwrap_or(false),
            kb_corpus_exists: cx.services.kb.corpus_exists(),
        };

        // Pre-rule: short greetings never reach the model.
        let data = if greeting_regex().is_match(&user) {
            serde_json::json!({
                "mode": "text_only",
                "tasks": ["text"],
                "confidence": 0.98,
                "intent_type": "chat",
            })
        } else {
            let prompt = classifier_prompt(
                &user,
                !state.attachments.is_empty(),
                state.context_bundle.has_last_image,
            );
            self.classify(&prompt, cx).await?
        };

        let raw_tasks = data.get("tasks").and_then(|t| t.as_array()).cloned().unwrap_or_default();
        let tasks = apply_post_rules(sanitize_tasks(&raw_tasks), &user, facts);
        let (flags, web_source, mode) = derive_plan(&tasks, facts.has_image_attachment);

        let plan = RunPlan {
            mode,
            text: TextPlan {
                enabled: mode != PlanMode::ToolsOnly,
                ..Default::default()
            },
            flags,
            web_source,
            note: Some("intent_structured_fast".into()),
        };

        let intent = Intent {
            intent_type: parse_intent_type(data.get("intent_type").and_then(|v| v.as_str()).unwrap_or("chat")),
            target_modality: if tasks.is_empty() { "text".into() } else { tasks.join("+") },
            confidence: data.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7),
        };

        let note = serde_json::json!({"mode": mode, "tasks": tasks, "flags": flags});
        Ok(StateUpdate {
            plan: Some(plan),
            intent: Some(intent),
            ..Default::default()
        }
        .note("intent", "Intent classified", note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tasks: &[String]) -> Vec<&str> {
        tasks.iter().map(String::as_str).collect()
    }

    #[test]
    fn greeting_pattern_matches_variants() {
        let re = greeting_regex();
        for g in ["hi", "Hello!", " hey ", "good morning", "what's up"] {
            assert!(re.is_match(g), "{g} should match");
        }
        assert!(!re.is_match("hi, search the web for rust news"));
    }

    #[test]
    fn cue_words_add_missing_lanes() {
        let tasks = apply_post_rules(vec![], "latest AI news and headlines", TurnFacts::default());
        assert!(tasks.iter().any(|t| t == "web"));
        assert!(tasks.iter().any(|t| t == "text"));
    }

    #[test]
    fn arxiv_cue_suppresses_plain_web() {
        let tasks = apply_post_rules(vec![], "latest arxiv papers on alignment", TurnFacts::default());
        assert!(tasks.iter().any(|t| t == "arxiv"));
        assert!(!tasks.iter().any(|t| t == "web"));
    }

    #[test]
    fn kb_cue_requires_corpus_on_disk() {
        let without = apply_post_rules(vec![], "tell me about employee Jane Doe", TurnFacts::default());
        assert!(!without.iter().any(|t| t == "kb_rag"));

        let with = apply_post_rules(
            vec![],
            "tell me about employee Jane Doe",
            TurnFacts {
                kb_corpus_exists: true,
                ..Default::default()
            },
        );
        assert!(with.iter().any(|t| t == "kb_rag"));
    }

    #[test]
    fn doc_question_reroutes_to_text_plus_rag() {
        let tasks = apply_post_rules(
            vec!["document".into()],
            "summarize the uploaded pdf",
            TurnFacts {
                has_doc_attachment: true,
                ..Default::default()
            },
        );
        assert!(!tasks.iter().any(|t| t == "document"));
        assert!(tasks.iter().any(|t| t == "rag"));
        assert!(tasks.iter().any(|t| t == "text"));
    }

    #[test]
    fn image_attachment_with_describe_cue_adds_vision_pair() {
        let tasks = apply_post_rules(
            vec![],
            "describe this image",
            TurnFacts {
                has_image_attachment: true,
                ..Default::default()
            },
        );
        assert!(tasks.iter().any(|t| t == "image"));
        assert!(tasks.iter().any(|t| t == "text"));
    }

    #[test]
    fn retrieval_forces_text_and_empty_defaults_to_text() {
        let tasks = apply_post_rules(vec!["web".into()], "ok", TurnFacts::default());
        assert!(tasks.iter().any(|t| t == "text"));

        let tasks = apply_post_rules(vec![], "ok", TurnFacts::default());
        assert_eq!(names(&tasks), vec!["text"]);
    }

    #[test]
    fn sanitize_drops_unknown_and_duplicate_tasks() {
        let raw = vec![
            serde_json::json!("text"),
            serde_json::json!("teleport"),
            serde_json::json!("TEXT"),
            serde_json::json!("web"),
        ];
        assert_eq!(names(&sanitize_tasks(&raw)), vec!["text", "web"]);
    }

    #[test]
    fn vision_vs_image_gen_complement() {
        let tasks: Vec<String> = vec!["image".into(), "text".into()];
        let (flags, _, _) = derive_plan(&tasks, true);
        assert!(flags.needs_vision);
        assert!(!flags.needs_image_gen);

        let (flags, _, _) = derive_plan(&tasks, false);
        assert!(!flags.needs_vision);
        assert!(flags.needs_image_gen);
    }

    #[test]
    fn mode_derivation() {
        let (_, _, mode) = derive_plan(&["text".into()], false);
        assert_eq!(mode, PlanMode::TextOnly);

        let (_, _, mode) = derive_plan(&["text".into(), "image".into()], false);
        assert_eq!(mode, PlanMode::TextPlusTools);

        let (_, _, mode) = derive_plan(&["document".into()], false);
        assert_eq!(mode, PlanMode::ToolsOnly);
    }

    #[test]
    fn web_source_prefers_arxiv() {
        let (_, source, _) = derive_plan(&["text".into(), "arxiv".into(), "web".into()], false);
        assert_eq!(source, Some(WebSource::Arxiv));

        let (_, source, _) = derive_plan(&["text".into(), "web".into()], false);
        assert_eq!(source, Some(WebSource::Tavily));

        let (_, source, _) = derive_plan(&["text".into()], false);
        assert_eq!(source, None);
    }
}
