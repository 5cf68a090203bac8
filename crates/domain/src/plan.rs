//! The per-turn run plan produced by the intent classifier and refined
//! by the routers.

use serde::{Deserialize, Serialize};

/// How this turn combines text and tool lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    TextOnly,
    TextPlusTools,
    ToolsOnly,
}

/// Style applied to the streamed text answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    Direct,
    Bullet,
    Detailed,
}

/// External web source a web task may hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSource {
    Tavily,
    Wikipedia,
    Arxiv,
}

/// Plan for the streamed text lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPlan {
    pub enabled: bool,
    #[serde(default = "TextPlan::default_style")]
    pub style: TextStyle,
    #[serde(default)]
    pub instruction: String,
}

impl TextPlan {
    fn default_style() -> TextStyle {
        TextStyle::Direct
    }
}

impl Default for TextPlan {
    fn default() -> Self {
        Self {
            enabled: true,
            style: TextStyle::Direct,
            instruction: String::new(),
        }
    }
}

/// Boolean lane flags derived from the classified tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanFlags {
    #[serde(default)]
    pub needs_web: bool,
    #[serde(default)]
    pub needs_rag: bool,
    #[serde(default)]
    pub needs_kb_rag: bool,
    #[serde(default)]
    pub needs_doc: bool,
    #[serde(default)]
    pub needs_vision: bool,
    #[serde(default)]
    pub needs_tts: bool,
    #[serde(default)]
    pub needs_image_gen: bool,
}

impl PlanFlags {
    /// True when any tool lane is requested.
    pub fn any_tool(&self) -> bool {
        self.needs_web
            || self.needs_rag
            || self.needs_kb_rag
            || self.needs_doc
            || self.needs_vision
            || self.needs_tts
            || self.needs_image_gen
    }
}

/// The full plan for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub mode: PlanMode,
    pub text: TextPlan,
    #[serde(default)]
    pub flags: PlanFlags,
    #[serde(default)]
    pub web_source: Option<WebSource>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            mode: PlanMode::TextOnly,
            text: TextPlan::default(),
            flags: PlanFlags::default(),
            web_source: None,
            note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_snake_case() {
        let json = serde_json::to_string(&PlanMode::TextPlusTools).unwrap();
        assert_eq!(json, "\"text_plus_tools\"");
        let back: PlanMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PlanMode::TextPlusTools);
    }

    #[test]
    fn default_plan_is_text_only() {
        let plan = RunPlan::default();
        assert_eq!(plan.mode, PlanMode::TextOnly);
        assert!(plan.text.enabled);
        assert!(!plan.flags.any_tool());
    }

    #[test]
    fn any_tool_reflects_each_flag() {
        let mut flags = PlanFlags::default();
        assert!(!flags.any_tool());
        flags.needs_kb_rag = true;
        assert!(flags.any_tool());
    }
}
