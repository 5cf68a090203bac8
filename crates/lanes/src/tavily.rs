//! Tavily web search.

use serde_json::Value;

use mf_domain::error::{Error, Result};
use mf_domain::result::{Citation, ToolResult};

use crate::worker::LaneServices;

/// Aggregator/search pages stripped from news results.
const BLOCKED_NEWS_URLS: [&str; 5] = [
    "google.com/search",
    "news.google.com",
    "/tag/",
    "/topic/",
    "/topics/",
];

/// Whether a query is freshness-sensitive.
pub fn is_news_query(text: &str) -> bool {
    let t = text.to_lowercase();
    ["news", "headline", "headlines", "latest", "recent", "today", "update"]
        .iter()
        .any(|k| t.contains(k))
}

/// Bias the query toward fresh results when the user asked for recency
/// without an explicit window.
pub fn effective_query(query: &str) -> String {
    let q_l = query.to_lowercase();
    let has_window = q_l.contains("today")
        || q_l.contains("this week")
        || regex::Regex::new(r"past \d+ days?").expect("static regex").is_match(&q_l);
    if is_news_query(query) && !has_window {
        format!("{query} today latest updates")
    } else {
        query.to_string()
    }
}

pub async fn search(query: &str, top_k: usize, services: &LaneServices) -> Result<ToolResult> {
    let Some(api_key) = services.config.tavily_api_key.clone() else {
        return Err(Error::Other("Missing env var: TAVILY_API_KEY".into()));
    };

    let news = is_news_query(query);
    let effective = effective_query(query);
    let body = serde_json::json!({
        "api_key": api_key,
        "query": effective,
        "max_results": top_k,
        "topic": if news { "news" } else { "general" },
    });

    let resp = services
        .http
        .post("https://api.tavily.com/search")
        .timeout(services.config.pacing.web_timeout)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::Http(format!("tavily request: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(Error::Http(format!("tavily HTTP {}: {text}", status.as_u16())));
    }

    let json: Value = resp
        .json()
        .await
        .map_err(|e| Error::Http(format!("tavily response: {e}")))?;

    let mut rows: Vec<Value> = json
        .get("results")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    if news {
        rows = filter_news_rows(rows);
    }

    let citations: Vec<Citation> = rows
        .iter()
        .map(|r| Citation {
            title: r.get("title").and_then(|v| v.as_str()).unwrap_or("").into(),
            url: r.get("url").and_then(|v| v.as_str()).unwrap_or("").into(),
            snippet: r.get("content").and_then(|v| v.as_str()).map(String::from),
        })
        .collect();

    Ok(ToolResult::ok(
        "tavily",
        "web",
        serde_json::json!({
            "query": query,
            "effective_query": effective,
            "results": rows,
        }),
    )
    .with_citations(citations))
}

/// Drop low-signal aggregator and topic-hub pages.
pub fn filter_news_rows(rows: Vec<Value>) -> Vec<Value> {
    rows.into_iter()
        .filter(|r| {
            let url = r.get("url").and_then(|v| v.as_str()).unwrap_or("").to_lowercase();
            !BLOCKED_NEWS_URLS.iter().any(|b| url.contains(b))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn news_detection_by_cue_words() {
        assert!(is_news_query("latest AI headlines"));
        assert!(is_news_query("what happened today"));
        assert!(!is_news_query("explain transformers"));
    }

    #[test]
    fn effective_query_appends_freshness_once() {
        assert_eq!(
            effective_query("latest AI news"),
            "latest AI news today latest updates"
        );
        // An explicit window is left alone.
        assert_eq!(effective_query("AI news today"), "AI news today");
        assert_eq!(effective_query("explain RAG"), "explain RAG");
    }

    #[test]
    fn aggregator_urls_are_filtered() {
        let rows = vec![
            serde_json::json!({"url": "https://news.google.com/x", "title": "agg"}),
            serde_json::json!({"url": "https://example.com/story", "title": "real"}),
            serde_json::json!({"url": "https://site.com/topic/ai", "title": "hub"}),
        ];
        let kept = filter_news_rows(rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["title"], "real");
    }
}
