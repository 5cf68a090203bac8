//! Web-multi lane: fan sub-queries out to the enumerated sources and
//! union the results.

use mf_domain::error::Result;
use mf_domain::plan::WebSource;
use mf_domain::result::ToolResult;
use mf_domain::task::Task;

use crate::worker::{LaneContext, LaneServices};
use crate::{arxiv, tavily, wiki};

pub async fn run(
    task: &Task,
    query: &str,
    top_k: usize,
    sources: &[WebSource],
    _ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    let mut futures = Vec::new();
    for source in sources {
        futures.push(async move {
            match source {
                WebSource::Tavily => tavily::search(query, top_k, services).await,
                // Wikipedia is a supporting source: capped lower.
                WebSource::Wikipedia => wiki::search(query, top_k.min(3), services).await,
                WebSource::Arxiv => arxiv::search(query, top_k, services).await,
            }
        });
    }

    let outcomes = futures_util::future::join_all(futures).await;

    let mut parts = Vec::new();
    let mut citations = Vec::new();
    let mut any_ok = false;
    for (source, outcome) in sources.iter().zip(outcomes) {
        let part = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(source = ?source, error = %e, "web source failed");
                ToolResult::fail(&task.id, "web", e.to_string())
            }
        };
        any_ok |= part.ok;
        citations.extend(part.citations.clone());
        parts.push(serde_json::to_value(&part)?);
    }

    Ok(ToolResult {
        task_id: task.id.clone(),
        kind: "web".into(),
        ok: any_ok,
        data: serde_json::json!({ "parts": parts }),
        citations,
        error: if any_ok { None } else { Some("all web sources failed".into()) },
    })
}
