//! The synthesizer: streams the final markdown answer from collected
//! tool context, ranked evidence, conflict signals, and the role-pack
//! contract. Two deterministic short-circuits render without a model:
//! arXiv-only turns and KB entity misses.

use std::collections::HashMap;

use serde_json::Value;

use mf_domain::error::Result;
use mf_domain::plan::WebSource;
use mf_domain::result::ToolResult;
use mf_domain::state::{ChatMessage, RunState};
use mf_domain::task::TaskSpec;
use mf_providers::InvokeRequest;
use mf_retrieval::kb::entity_hint;

use crate::graph::nodes::intent::greeting_regex;
use crate::graph::streaming::{stream_fixed_text, stream_tokens};
use crate::graph::GraphCx;

const LENGTH_RULES: &str = "Length policy:\n\
- Explanation/overview/definition requests: target about 1 page (roughly 350-500 words).\n\
- Greetings, acknowledgements, or very simple asks: keep concise (1-4 lines).\n\
- Mixed asks: allocate length proportionally and avoid filler.\n";

const GREETING_REWRITE_WORDS: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic renders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// KB entity miss: `Some(name)` when a kb_rag lane succeeded with the
/// `entity_not_found` marker and no matches.
pub fn kb_entity_miss(outs: &HashMap<String, ToolResult>) -> Option<String> {
    for out in outs.values() {
        if out.kind != "kb_rag" || !out.ok {
            continue;
        }
        let matches_empty = out
            .data
            .get("matches")
            .and_then(|m| m.as_array())
            .map(|m| m.is_empty())
            .unwrap_or(true);
        let missing = out.data.get("entity_not_found").and_then(|v| v.as_str());
        if let (true, Some(name)) = (matches_empty, missing) {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
    }
    None
}

/// The fixed notice rendered for a KB entity miss.
pub fn kb_miss_notice(name: &str) -> String {
    format!(
        "## Knowledge Base Result\n\n\
         No exact record was found for \"{name}\" in the knowledge base.\n\n\
         Try the full official name or verify spelling.\n"
    )
}

/// Collect arXiv items when *every* web task ran with
/// `sources == [arxiv]`; mixed-source runs return `None`.
pub fn arxiv_only_items(state: &RunState, outs: &HashMap<String, ToolResult>) -> Option<Vec<Value>> {
    let web_tasks: Vec<_> = state
        .tasks
        .iter()
        .filter_map(|t| match &t.spec {
            TaskSpec::Web { sources, .. } => Some((t.id.as_str(), sources)),
            _ => None,
        })
        .collect();
    if web_tasks.is_empty() || web_tasks.iter().any(|(_, s)| *s != &vec![WebSource::Arxiv]) {
        return None;
    }

    let mut items = Vec::new();
    for (task_id, _) in web_tasks {
        let Some(out) = outs.get(task_id) else { continue };
        let parts = out.data.get("parts").and_then(|p| p.as_array()).cloned().unwrap_or_default();
        for part in parts {
            if let Some(part_items) = part.pointer("/data/items").and_then(|i| i.as_array()) {
                items.extend(part_items.iter().cloned());
            }
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Deterministic markdown for arXiv-only results: exact titles, real
/// abs URLs, truncated summaries.
pub fn render_arxiv_markdown(items: &[Value]) -> String {
    let mut out = String::from("## Results from Arxiv\n\n");
    for (i, item) in items.iter().enumerate() {
        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled");
        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
        let summary: String = item
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .chars()
            .take(300)
            .collect();
        out.push_str(&format!("{}. **{title}**\n   {url}\n   {summary}\n", i + 1));
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn history_text(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Digest of tool outputs fed to the model: support summaries, RAG/KB
/// snippets (top-4 at 500 chars), web lines, vision/doc summaries.
pub fn tool_context_text(outs: &HashMap<String, ToolResult>) -> String {
    let mut rows = Vec::new();
    for out in outs.values() {
        if !out.ok {
            continue;
        }
        let kind = out.kind.as_str();
        let support = out.data_str("support_summary").trim().to_string();
        if !support.is_empty() {
            rows.push(format!("{} SUMMARY:\n{support}", kind.to_uppercase()));
        }
        match kind {
            "rag" | "kb_rag" => {
                let snippets: Vec<String> = out
                    .data
                    .get("matches")
                    .and_then(|m| m.as_array())
                    .map(|matches| {
                        matches
                            .iter()
                            .take(4)
                            .filter_map(|m| m.get("text").and_then(|t| t.as_str()))
                            .map(|t| truncate_chars(t.trim(), 500))
                            .collect()
                    })
                    .unwrap_or_default();
                if !snippets.is_empty() {
                    rows.push(format!("{} SNIPPETS:\n{}", kind.to_uppercase(), snippets.join("\n---\n")));
                }
            }
            "web" => {
                let mut lines = Vec::new();
                let parts = out.data.get("parts").and_then(|p| p.as_array()).cloned().unwrap_or_default();
                for part in &parts {
                    let items = part
                        .pointer("/data/items")
                        .or_else(|| part.pointer("/data/results"))
                        .and_then(|i| i.as_array())
                        .cloned()
                        .unwrap_or_default();
                    for item in items.iter().take(5) {
                        let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("");
                        let url = item.get("url").and_then(|v| v.as_str()).unwrap_or("");
                        let published = item.get("published").and_then(|v| v.as_str()).unwrap_or("");
                        let summary = item
                            .get("summary")
                            .or_else(|| item.get("content"))
                            .or_else(|| item.get("snippet"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        if !url.is_empty() {
                            lines.push(format!("- {title} | {url} | {published} | {}", truncate_chars(summary, 200)));
                        }
                    }
                }
                if !lines.is_empty() {
                    rows.push(format!("WEB RESULTS:\n{}", lines.join("\n")));
                }
            }
            "vision" => {
                let text = out.data_str("text");
                if !text.is_empty() {
                    rows.push(format!("VISION: {text}"));
                }
            }
            "doc" => {
                let text = out.data_str("text");
                if !text.is_empty() {
                    rows.push(format!("DOC: {}", truncate_chars(text, 1200)));
                }
            }
            _ => {}
        }
    }
    rows.join("\n\n")
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() >= 3)
        .map(str::to_string)
        .collect()
}

/// Top-5 evidence rows ranked by word overlap between the query and
/// `source + text`.
pub fn ranked_evidence(query: &str, outs: &HashMap<String, ToolResult>) -> String {
    let tokens = query_tokens(query);
    if tokens.is_empty() {
        return String::new();
    }

    let mut rows: Vec<(String, String)> = Vec::new();
    for out in outs.values() {
        if !out.ok {
            continue;
        }
        if let Some(matches) = out.data.get("matches").and_then(|m| m.as_array()) {
            for m in matches {
                let source = m.get("source").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let text = m.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                rows.push((source, text));
            }
        }
        for citation in &out.citations {
            rows.push((
                citation.url.clone(),
                format!("{} {}", citation.title, citation.snippet.clone().unwrap_or_default()),
            ));
        }
    }

    let mut scored: Vec<(usize, String, String)> = rows
        .into_iter()
        .map(|(source, text)| {
            let hay = format!("{} {}", source, text).to_lowercase();
            let score = tokens.iter().filter(|t| hay.contains(t.as_str())).count();
            (score, source, text)
        })
        .filter(|(score, _, _)| *score > 0)
        .collect();
    scored.sort_by_key(|(score, _, _)| std::cmp::Reverse(*score));
    scored.truncate(5);

    if scored.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = scored
        .into_iter()
        .map(|(_, source, text)| format!("- {source}: {}", truncate_chars(text.trim(), 200)))
        .collect();
    format!("Ranked evidence (most relevant first):\n{}", lines.join("\n"))
}

/// Entity-bleed warning for "who is X" style queries: evidence whose
/// source does not mention the asked entity gets flagged so the model
/// does not blend records.
pub fn conflict_signals(query: &str, outs: &HashMap<String, ToolResult>) -> String {
    let Some(hint) = entity_hint(query) else {
        return String::new();
    };
    let tokens: Vec<String> = hint
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return String::new();
    }

    let mut foreign = 0usize;
    for out in outs.values() {
        if !out.ok {
            continue;
        }
        if let Some(matches) = out.data.get("matches").and_then(|m| m.as_array()) {
            for m in matches {
                let source = m.get("source").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
                if !tokens.iter().all(|t| source.contains(t.as_str())) {
                    foreign += 1;
                }
            }
        }
    }
    if foreign == 0 {
        return String::new();
    }
    format!(
        "Conflict check: some evidence may describe a different entity than \"{hint}\". \
         Use only evidence clearly about \"{hint}\" and ignore the rest."
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// When media lanes ran, a final text disclaiming the ability to
/// create media contradicts the rendered blocks; discard it.
pub fn violates_media_guard(final_text: &str, has_media_tasks: bool) -> bool {
    if !has_media_tasks {
        return false;
    }
    let low = final_text.to_lowercase();
    [
        "can't create",
        "cannot create",
        "unable to create",
        "i can't create",
        "i cannot create",
    ]
    .iter()
    .any(|b| low.contains(b))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the final answer. The knowledge cohort must have completed
/// before this is called.
pub async fn synthesize(
    state: &RunState,
    outs: &HashMap<String, ToolResult>,
    cx: &GraphCx,
) -> Result<String> {
    let (text_provider, text_model) = cx.config.routing.text(&cx.provider, &cx.model);
    let query_text = if state.text_query.trim().is_empty() {
        state.user_text.clone()
    } else {
        state.text_query.clone()
    };

    // Deterministic short-circuit: KB entity miss.
    if let Some(missing) = kb_entity_miss(outs) {
        let notice = kb_miss_notice(&missing);
        stream_fixed_text(&notice, &cx.emitter, cx.config.pacing.meta_stream_token_delay).await;
        return Ok(notice);
    }

    // Deterministic short-circuit: arXiv-only web results.
    if let Some(items) = arxiv_only_items(state, outs) {
        let markdown = render_arxiv_markdown(&items);
        stream_fixed_text(&markdown, &cx.emitter, cx.config.pacing.arxiv_stream_token_delay).await;
        return Ok(markdown);
    }

    let no_tool_tasks = state.tasks.is_empty();
    let is_greeting = greeting_regex().is_match(&query_text);
    let recent_history: &[ChatMessage] = if no_tool_tasks {
        let n = state.chat_history.len();
        &state.chat_history[n.saturating_sub(4)..]
    } else {
        &state.chat_history
    };
    let context = tool_context_text(outs);
    let evidence = ranked_evidence(&query_text, outs);
    let conflicts = conflict_signals(&query_text, outs);
    let contract = &state.response_contract;

    let mut prompt = String::from("You are Manifold. Answer directly in markdown.\n");
    if no_tool_tasks {
        prompt.push_str("Keep response lightweight and direct.\nUse plain markdown with minimal structure.\n");
    } else {
        prompt.push_str(LENGTH_RULES);
        prompt.push_str("Prefer short headings and concise bullets.\nAvoid long paragraphs (>3 lines each).\n");
    }
    if is_greeting {
        prompt.push_str(
            "This turn is a greeting/social opener.\n\
             Reply with exactly one short friendly sentence (max 14 words), no headings.\n",
        );
    }
    prompt.push_str(
        "If tool outputs are present, treat them as completed and avoid status chatter.\n\
         Never claim inability such as 'I can't create images/audio/documents'.\n\
         Do not invent URLs. Use only URLs present in context.\n",
    );
    prompt.push_str(&state.text_instructions);
    prompt.push('\n');

    if !contract.is_empty() && !no_tool_tasks {
        prompt.push_str(&format!(
            "\nPlanner contract:\nResearcher brief:\n{}\n\nWriter plan:\n{}\n\nCritic checks:\n{}\n",
            contract.researcher_brief, contract.writer_plan, contract.critic_checks
        ));
    }
    prompt.push_str(&format!("\nConversation so far:\n{}\n", history_text(recent_history)));
    if !context.is_empty() {
        prompt.push_str(&format!("\nTool context:\n{context}\n"));
    }
    if !evidence.is_empty() {
        prompt.push_str(&format!("\n{evidence}\n"));
    }
    if !conflicts.is_empty() {
        prompt.push_str(&format!("\n{conflicts}\n"));
    }
    prompt.push_str(&format!("\nUser message:\n{query_text}\n"));

    let mut final_text =
        stream_tokens(&prompt, &cx.emitter, &cx.registry, &text_provider, &text_model, 0.2).await?;

    let has_media_tasks = state
        .tasks
        .iter()
        .any(|t| matches!(t.kind(), "image_gen" | "tts" | "doc"));
    if violates_media_guard(&final_text, has_media_tasks) {
        tracing::warn!(run_id = %state.run_id, "final text violated media guard, discarded");
        final_text = String::new();
    }

    // A greeting answered with a paragraph gets one bounded rewrite.
    if is_greeting
        && state.plan_runtime.max_rewrites > 0
        && final_text.split_whitespace().count() > GREETING_REWRITE_WORDS
    {
        let rewrite_prompt = format!(
            "Rewrite the following reply as exactly one short friendly sentence (max 14 words).\n\
             No markdown, no quotes.\n\nREPLY:\n{final_text}\n"
        );
        match cx
            .registry
            .invoke_with_fallback(&text_provider, &text_model, &InvokeRequest::new(rewrite_prompt, 0.0))
            .await
        {
            Ok(short) if !short.trim().is_empty() => final_text = short.trim().to_string(),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "greeting rewrite failed, keeping original"),
        }
    }

    Ok(final_text)
}
