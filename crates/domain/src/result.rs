//! The uniform result envelope every lane worker returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A source reference attached to a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Result of one lane task. `data` is kind-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub task_id: String,
    pub kind: String,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(task_id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            ok: true,
            data,
            citations: Vec::new(),
            error: None,
        }
    }

    pub fn fail(
        task_id: impl Into<String>,
        kind: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            ok: false,
            data: Value::Null,
            citations: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    /// Fetch a string field out of `data`, empty if absent.
    pub fn data_str(&self, key: &str) -> &str {
        self.data.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_error_and_null_data() {
        let r = ToolResult::fail("t1", "web", "boom");
        assert!(!r.ok);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.data.is_null());
    }

    #[test]
    fn error_field_omitted_when_ok() {
        let r = ToolResult::ok("t1", "rag", serde_json::json!({"matches": []}));
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn data_str_reads_nested_field() {
        let r = ToolResult::ok("t1", "vision", serde_json::json!({"text": "a cat"}));
        assert_eq!(r.data_str("text"), "a cat");
        assert_eq!(r.data_str("missing"), "");
    }
}
