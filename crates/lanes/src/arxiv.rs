//! arXiv search over the public Atom export API.
//!
//! Builds an effective API query (title hints get `ti:` clauses,
//! generative-AI topics get a CS category bias, an explicit year adds a
//! submittedDate window), then post-ranks the returned entries by
//! title/summary term overlap. Only `abs` URLs are kept.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::Value;

use mf_domain::error::{Error, Result};
use mf_domain::result::{Citation, ToolResult};

use crate::worker::LaneServices;

const GENAI_HINT_TERMS: [&str; 9] = [
    "gen ai",
    "genai",
    "generative ai",
    "foundation model",
    "foundation models",
    "large language model",
    "large language models",
    "llm",
    "llms",
];

const GENAI_BOOST_TERMS: [&str; 14] = [
    "generative ai",
    "generative model",
    "foundation model",
    "large language model",
    "llm",
    "diffusion",
    "text-to-image",
    "text to image",
    "image generation",
    "prompting",
    "instruction tuning",
    "rlhf",
    "rlaif",
    "multimodal",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query shaping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn squash_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_for_match(s: &str) -> String {
    let cleaned: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    squash_ws(&cleaned)
}

/// Strip command wrappers ("find me papers on ...") down to the topic.
pub fn clean_topic_query(raw: &str) -> String {
    let t = squash_ws(raw);
    let wrappers = [
        r"(?i)^(?:can you|could you|please)\s+",
        r"(?i)^(?:find|search|show|get|list)\s+(?:me\s+)?",
        r"(?i)^(?:the\s+)?(?:research\s+)?papers?\s*(?:on|about|for|:)\s+",
        r"(?i)^(?:from\s+arxiv[,:\s]+)",
        r"(?i)^(?:in\s+arxiv[,:\s]+)",
    ];
    let mut out = t.clone();
    for p in wrappers {
        out = Regex::new(p).expect("static regex").replace(&out, "").trim().to_string();
    }
    let out = squash_ws(&out);
    if out.is_empty() {
        t
    } else {
        out
    }
}

/// Detect a specific-paper-title ask: quoted titles, `title:` prefixes,
/// or "find me <long phrase>" style requests.
pub fn extract_title_hint(topic: &str) -> String {
    for re in [r#""([^"]{6,})""#, r"'([^']{6,})'"] {
        if let Some(caps) = Regex::new(re).expect("static regex").captures(topic) {
            return squash_ws(&caps[1]);
        }
    }
    if let Some(caps) = Regex::new(r"(?i)(?:paper|research paper|title)\s*:\s*(.+)$")
        .expect("static regex")
        .captures(topic)
    {
        let t = caps[1].trim();
        if !t.is_empty() {
            return squash_ws(t);
        }
    }
    let low = topic.to_lowercase();
    if ["paper", "research paper", "find me", "can find me"].iter().any(|k| low.contains(k))
        && topic.split_whitespace().count() >= 4
    {
        return squash_ws(topic);
    }
    String::new()
}

fn is_genai_intent(topic: &str) -> bool {
    let t = topic.to_lowercase();
    GENAI_HINT_TERMS.iter().any(|h| t.contains(h))
}

fn topic_terms(topic: &str) -> Vec<String> {
    const STOP: [&str; 29] = [
        "the", "a", "an", "in", "on", "for", "about", "of", "to", "and", "paper", "papers",
        "research", "recent", "latest", "find", "me", "can", "you", "please", "show", "list",
        "get", "search", "from", "arxiv", "is", "this", "that",
    ];
    normalize_for_match(topic)
        .split_whitespace()
        .filter(|t| t.len() >= 2 && !STOP.contains(t))
        .map(str::to_string)
        .collect()
}

/// Build the arXiv API `search_query` string.
pub fn build_effective_query(topic: &str, year: Option<u32>, title_hint: &str) -> String {
    let clean = squash_ws(topic);
    let mut query = if !title_hint.is_empty() {
        let t = squash_ws(title_hint);
        format!("ti:\"{t}\" OR all:\"{t}\"")
    } else if is_genai_intent(&clean) {
        // Bias toward CS GenAI literature while preserving recency.
        "cat:cs.* AND (all:\"generative ai\" OR all:\"large language model\" OR all:llm OR \
         all:\"foundation model\" OR all:diffusion OR all:\"text-to-image\" OR all:multimodal)"
            .to_string()
    } else {
        format!("all:{clean}")
    };
    if let Some(year) = year {
        query = format!("{query} AND submittedDate:[{year}01010000 TO {year}12312359]");
    }
    query
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry ranking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed Atom entry.
#[derive(Debug, Clone, Default)]
pub struct ArxivEntry {
    pub title: String,
    pub url: String,
    pub pdf_url: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
}

fn score_entry(entry: &ArxivEntry, terms: &[String], genai: bool, title_hint: &str) -> i64 {
    let title = entry.title.to_lowercase();
    let summary = entry.summary.to_lowercase();
    let mut score: i64 = 0;

    let norm_title = normalize_for_match(&title);
    let norm_hint = normalize_for_match(title_hint);
    if !norm_hint.is_empty() {
        if norm_title == norm_hint {
            score += 1000;
        } else if norm_title.contains(&norm_hint) {
            score += 450;
        }
        let hint_tokens: Vec<&str> = norm_hint.split_whitespace().filter(|t| t.len() >= 3).collect();
        if !hint_tokens.is_empty() {
            let overlap = hint_tokens.iter().filter(|t| norm_title.contains(**t)).count();
            score += ((overlap as f64 / hint_tokens.len() as f64) * 250.0) as i64;
        }
    }

    for term in terms {
        if title.contains(term.as_str()) {
            score += 5;
        } else if summary.contains(term.as_str()) {
            score += 2;
        }
    }

    if genai {
        for term in GENAI_BOOST_TERMS {
            if title.contains(term) {
                score += 6;
            } else if summary.contains(term) {
                score += 3;
            }
        }
    }

    if !entry.published.is_empty() {
        score += 1;
    }
    score
}

/// Rank entries and keep positive-signal ones first; broad queries fall
/// back to best-effort ranked recents.
pub fn rank_and_filter(entries: Vec<ArxivEntry>, topic: &str, top_k: usize, title_hint: &str) -> Vec<ArxivEntry> {
    let terms = topic_terms(topic);
    let genai = is_genai_intent(topic);
    let mut scored: Vec<(ArxivEntry, i64)> = entries
        .into_iter()
        .map(|e| {
            let s = score_entry(&e, &terms, genai, title_hint);
            (e, s)
        })
        .collect();
    scored.sort_by_key(|(_, s)| -s);

    let threshold = if title_hint.is_empty() { 1 } else { 120 };
    let filtered: Vec<ArxivEntry> = scored
        .iter()
        .filter(|(_, s)| *s >= threshold)
        .map(|(e, _)| e.clone())
        .collect();

    let picked = if filtered.len() < top_k.max(1) {
        scored.into_iter().map(|(e, _)| e).collect::<Vec<_>>()
    } else {
        filtered
    };
    picked.into_iter().take(top_k.max(1)).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Atom parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the arXiv Atom feed into entries. Only `abs` ids survive as
/// entry URLs; the pdf link is carried separately.
pub fn parse_atom(xml: &str) -> Result<Vec<ArxivEntry>> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut in_author = false;
    let mut path: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "entry" => current = Some(ArxivEntry::default()),
                    "author" => in_author = true,
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "link" {
                    if let Some(entry) = current.as_mut() {
                        let mut href = String::new();
                        let mut title_attr = String::new();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let val = String::from_utf8_lossy(&attr.value).to_string();
                            match key.as_str() {
                                "href" => href = val,
                                "title" => title_attr = val,
                                _ => {}
                            }
                        }
                        if title_attr == "pdf" {
                            entry.pdf_url = href;
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                let Some(entry) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                match path.last().map(String::as_str) {
                    Some("id") => entry.url = text.trim().to_string(),
                    Some("title") => entry.title = squash_ws(&text),
                    Some("summary") => entry.summary = squash_ws(&text),
                    Some("published") => entry.published = text.trim().to_string(),
                    Some("name") if in_author => entry.authors.push(text.trim().to_string()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "entry" => {
                        if let Some(entry) = current.take() {
                            if entry.url.contains("/abs/") {
                                entries.push(entry);
                            }
                        }
                    }
                    "author" => in_author = false,
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Other(format!("arxiv atom parse: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn fetch_feed(
    services: &LaneServices,
    api_query: &str,
    max_results: usize,
    sort_by: &str,
) -> Result<String> {
    let resp = services
        .http
        .get("https://export.arxiv.org/api/query")
        .timeout(services.config.pacing.web_timeout)
        .query(&[
            ("search_query", api_query),
            ("max_results", &max_results.to_string()),
            ("sortBy", sort_by),
            ("sortOrder", "descending"),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("arxiv request: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Http(format!("arxiv HTTP {}", status.as_u16())));
    }
    resp.text()
        .await
        .map_err(|e| Error::Http(format!("arxiv body: {e}")))
}

pub async fn search(query: &str, top_k: usize, services: &LaneServices) -> Result<ToolResult> {
    let q = query.trim().to_string();
    let year_re = Regex::new(r"\b(20\d{2})\b").expect("static regex");
    let year = year_re.captures(&q).and_then(|c| c[1].parse::<u32>().ok());
    let mut topic = year_re.replace_all(&q, " ").to_string();
    topic = Regex::new(r"(?i)\b(in|from|on|about)\b\s*$")
        .expect("static regex")
        .replace(&topic, "")
        .trim()
        .to_string();
    if topic.is_empty() {
        topic = q.clone();
    }
    topic = clean_topic_query(&topic);

    let title_hint = extract_title_hint(&topic);
    let api_query = build_effective_query(&topic, year, &title_hint);
    let sort_by = if title_hint.is_empty() { "submittedDate" } else { "relevance" };
    let fetch = (top_k * 6).max(15);

    match fetch_feed(services, &api_query, fetch, sort_by).await.and_then(|xml| parse_atom(&xml)) {
        Ok(mut entries) if !entries.is_empty() => {
            if let Some(year) = year {
                entries.retain(|e| e.published.starts_with(&year.to_string()));
            }
            let entries = rank_and_filter(entries, &topic, top_k, &title_hint);

            let citations: Vec<Citation> = entries
                .iter()
                .filter(|e| !e.title.is_empty() && !e.url.is_empty())
                .map(|e| Citation {
                    title: e.title.clone(),
                    url: e.url.clone(),
                    snippet: Some(e.summary.chars().take(300).collect()),
                })
                .collect();

            let items: Vec<Value> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "title": e.title,
                        "url": e.url,
                        "pdf_url": e.pdf_url,
                        "summary": e.summary,
                        "authors": e.authors,
                        "published": e.published,
                    })
                })
                .collect();

            Ok(ToolResult::ok(
                "arxiv",
                "web",
                serde_json::json!({
                    "query": q,
                    "effective_query": api_query,
                    "items": items,
                }),
            )
            .with_citations(citations))
        }
        Ok(_) | Err(_) => {
            // Legacy fallback: one broad query rendered as a text blob.
            tracing::warn!(query = %q, "structured arxiv search failed, using legacy summary");
            let xml = fetch_feed(services, &format!("all:{topic}"), top_k.max(1), "relevance").await?;
            let entries = parse_atom(&xml)?;
            let text = entries
                .iter()
                .map(|e| format!("{}\n{}", e.title, e.summary))
                .collect::<Vec<_>>()
                .join("\n\n");
            let citations = vec![Citation {
                title: format!("arXiv search: {q}"),
                url: "https://arxiv.org/search/".into(),
                snippet: Some(text.chars().take(300).collect()),
            }];
            Ok(ToolResult::ok(
                "arxiv",
                "web",
                serde_json::json!({ "query": q, "effective_query": topic, "text": text }),
            )
            .with_citations(citations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_cleaning_strips_wrappers() {
        assert_eq!(
            clean_topic_query("can you find me papers on llm alignment"),
            "llm alignment"
        );
        assert_eq!(clean_topic_query("papers about diffusion models"), "diffusion models");
    }

    #[test]
    fn title_hint_from_quotes() {
        assert_eq!(
            extract_title_hint("find the paper \"Attention Is All You Need\""),
            "Attention Is All You Need"
        );
        assert_eq!(extract_title_hint("llm alignment"), "");
    }

    #[test]
    fn effective_query_title_hint() {
        let q = build_effective_query("attention is all you need", None, "Attention Is All You Need");
        assert!(q.starts_with("ti:\"Attention Is All You Need\""));
        assert!(q.contains("OR all:\"Attention Is All You Need\""));
    }

    #[test]
    fn effective_query_genai_bias_and_year() {
        let q = build_effective_query("llm alignment", Some(2024), "");
        assert!(q.starts_with("cat:cs.*"));
        assert!(q.contains("submittedDate:[202401010000 TO 202412312359]"));
    }

    #[test]
    fn effective_query_plain_topic() {
        assert_eq!(build_effective_query("topology optimization", None, ""), "all:topology optimization");
    }

    #[test]
    fn atom_parsing_keeps_abs_urls_only() {
        let xml = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/abs/2401.00001v1</id>
    <title>Aligning  Large Language Models</title>
    <summary>We study alignment.</summary>
    <published>2024-01-02T00:00:00Z</published>
    <author><name>A. Author</name></author>
    <link href="http://arxiv.org/pdf/2401.00001v1" title="pdf"/>
  </entry>
  <entry>
    <id>http://example.com/not-arxiv</id>
    <title>Bogus</title>
    <summary>Nope.</summary>
  </entry>
</feed>"#;
        let entries = parse_atom(xml).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.url, "http://arxiv.org/abs/2401.00001v1");
        assert_eq!(e.title, "Aligning Large Language Models");
        assert_eq!(e.pdf_url, "http://arxiv.org/pdf/2401.00001v1");
        assert_eq!(e.authors, vec!["A. Author"]);
    }

    #[test]
    fn ranking_prefers_term_overlap() {
        let on_topic = ArxivEntry {
            title: "llm alignment via preference learning".into(),
            url: "http://arxiv.org/abs/1".into(),
            summary: "alignment methods for llm systems".into(),
            published: "2024-05-01".into(),
            ..Default::default()
        };
        let off_topic = ArxivEntry {
            title: "soil dynamics".into(),
            url: "http://arxiv.org/abs/2".into(),
            summary: "geology".into(),
            published: "2024-05-02".into(),
            ..Default::default()
        };
        let ranked = rank_and_filter(vec![off_topic, on_topic], "llm alignment", 2, "");
        assert_eq!(ranked[0].url, "http://arxiv.org/abs/1");
    }

    #[test]
    fn exact_title_match_dominates() {
        let exact = ArxivEntry {
            title: "Attention Is All You Need".into(),
            url: "http://arxiv.org/abs/1706.03762".into(),
            summary: "transformers".into(),
            published: "2017-06-12".into(),
            ..Default::default()
        };
        let near = ArxivEntry {
            title: "Attention Is Not All You Need".into(),
            url: "http://arxiv.org/abs/2".into(),
            summary: "critique".into(),
            published: "2021-03-01".into(),
            ..Default::default()
        };
        let ranked = rank_and_filter(
            vec![near, exact],
            "attention is all you need",
            1,
            "Attention Is All You Need",
        );
        assert_eq!(ranked[0].url, "http://arxiv.org/abs/1706.03762");
    }
}
