//! Session RAG lane: retrieval over this session's uploaded documents.

use mf_domain::error::Result;
use mf_domain::result::ToolResult;
use mf_domain::task::Task;

use crate::worker::{LaneContext, LaneServices};

pub async fn run(
    task: &Task,
    query: &str,
    top_k: usize,
    ctx: &LaneContext,
    services: &LaneServices,
) -> Result<ToolResult> {
    services
        .session_rag
        .ensure_index(&ctx.session_id, &ctx.attachments)
        .await?;
    let out = services.session_rag.search(&ctx.session_id, query, top_k).await?;

    let citations = out.citations.clone();
    Ok(ToolResult::ok(
        &task.id,
        "rag",
        serde_json::json!({
            "query": out.query,
            "matches": out.matches,
        }),
    )
    .with_citations(citations))
}
