//! The SSE event envelope shared by every producer on a run.
//!
//! One envelope shape for all event kinds keeps the stream encoder
//! trivial: `{type, run_id, trace_id, ts_ms, data}` where `data` is a
//! kind-specific JSON object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator for stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    Plan,
    TaskStart,
    TaskResult,
    Token,
    BlockStart,
    BlockToken,
    BlockEnd,
    Error,
    RunEnd,
}

impl EventType {
    /// Structural events must never be dropped under back-pressure;
    /// token events may be.
    pub fn is_droppable(self) -> bool {
        matches!(self, EventType::Token | EventType::BlockToken)
    }
}

/// A single event on the run stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: String,
    pub trace_id: Option<String>,
    pub ts_ms: i64,
    #[serde(default)]
    pub data: Value,
}

impl SseEvent {
    pub fn new(
        event_type: EventType,
        run_id: impl Into<String>,
        trace_id: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            trace_id,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    /// Frame the event as a `text/event-stream` record.
    pub fn to_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".into());
        format!("event: message\ndata: {json}\n\n")
    }
}
