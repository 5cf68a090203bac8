//! Lenient JSON extraction from LLM replies.

use mf_domain::error::{Error, Result};
use serde_json::Value;

/// Best-effort: parse the full text, else the first `{...}` block.
///
/// Classifier models are prompted for bare JSON but occasionally wrap
/// the object in prose or a code fence; the braces-slice fallback
/// tolerates both.
pub fn extract_json(text: &str) -> Result<Value> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Validation("empty LLM output".into()));
    }

    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }

    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(a), Some(b)) if b > a => {
            let v: Value = serde_json::from_str(&text[a..=b])?;
            Ok(v)
        }
        _ => Err(Error::Validation("no JSON object found in LLM output".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let v = extract_json(r#"{"mode":"text_only","tasks":["text"]}"#).unwrap();
        assert_eq!(v["mode"], "text_only");
    }

    #[test]
    fn parses_json_with_preamble_and_fence() {
        let raw = "Here is the plan:\n```json\n{\"mode\":\"tools_only\",\"confidence\":0.9}\n```";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["mode"], "tools_only");
    }

    #[test]
    fn rejects_empty_and_braceless() {
        assert!(extract_json("").is_err());
        assert!(extract_json("no json here").is_err());
    }
}
