//! Wikipedia search via the public MediaWiki API.

use serde_json::Value;

use mf_domain::error::{Error, Result};
use mf_domain::result::{Citation, ToolResult};

use crate::worker::LaneServices;

pub async fn search(query: &str, top_k: usize, services: &LaneServices) -> Result<ToolResult> {
    let top_k = top_k.max(1);
    let resp = services
        .http
        .get("https://en.wikipedia.org/w/api.php")
        .timeout(services.config.pacing.web_timeout)
        .header("User-Agent", "Manifold/0.1 (assistant backend)")
        .query(&[
            ("action", "query"),
            ("list", "search"),
            ("srsearch", query),
            ("format", "json"),
            ("srlimit", &top_k.to_string()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("wikipedia request: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Http(format!("wikipedia HTTP {}", status.as_u16())));
    }

    let json: Value = resp
        .json()
        .await
        .map_err(|e| Error::Http(format!("wikipedia response: {e}")))?;

    let hits = json
        .pointer("/query/search")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut items = Vec::new();
    let mut citations = Vec::new();
    for hit in hits.iter().take(top_k) {
        let title = hit.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let link = page_url(title);
        items.push(serde_json::json!({
            "title": title,
            "url": link,
            "snippet": hit.get("snippet").and_then(|v| v.as_str()).unwrap_or(""),
        }));
        citations.push(Citation {
            title: title.to_string(),
            url: link,
            snippet: None,
        });
    }

    Ok(ToolResult::ok("wiki", "web", serde_json::json!({ "items": items })).with_citations(citations))
}

fn page_url(title: &str) -> String {
    format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_url_underscores_spaces() {
        assert_eq!(
            page_url("Retrieval augmented generation"),
            "https://en.wikipedia.org/wiki/Retrieval_augmented_generation"
        );
    }
}
