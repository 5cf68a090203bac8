//! Knowledge-base RAG lane.
//!
//! Retrieval-only: the synthesizer streams the final answer from this
//! context. An entity miss is a *successful* result carrying the
//! `entity_not_found` marker so the synthesizer can render its fixed
//! notice.

use mf_domain::error::Result;
use mf_domain::result::ToolResult;
use mf_domain::task::Task;

use crate::worker::LaneServices;

pub async fn run(task: &Task, query: &str, top_k: usize, services: &LaneServices) -> Result<ToolResult> {
    let out = services.kb.search(query, top_k).await?;

    let mut data = serde_json::json!({
        "query": out.query,
        "matches": out.matches,
    });
    if let Some(missing) = &out.entity_not_found {
        data["entity_not_found"] = serde_json::json!(missing);
    }

    let citations = out.citations.clone();
    Ok(ToolResult::ok(&task.id, "kb_rag", data).with_citations(citations))
}
