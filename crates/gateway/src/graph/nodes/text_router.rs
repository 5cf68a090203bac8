//! Text router: pick the answer style from cue words and record the
//! style instruction for the synthesizer.

use mf_domain::error::Result;
use mf_domain::plan::TextStyle;
use mf_domain::state::{RunState, StateUpdate};

use crate::graph::runner::Node;
use crate::graph::GraphCx;

pub fn style_for(user_text: &str) -> TextStyle {
    let user = user_text.to_lowercase();
    if ["bullet", "bullets", "5 points", "points"].iter().any(|k| user.contains(k)) {
        TextStyle::Bullet
    } else if ["detail", "deep", "explain"].iter().any(|k| user.contains(k)) {
        TextStyle::Detailed
    } else {
        TextStyle::Direct
    }
}

fn style_name(style: TextStyle) -> &'static str {
    match style {
        TextStyle::Direct => "direct",
        TextStyle::Bullet => "bullet",
        TextStyle::Detailed => "detailed",
    }
}

pub struct TextRouterNode;

#[async_trait::async_trait]
impl Node for TextRouterNode {
    fn name(&self) -> &'static str {
        "text_router"
    }

    async fn run(&self, state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        let mut plan = state.plan.clone();
        if !plan.text.enabled {
            return Ok(StateUpdate {
                plan: Some(plan),
                text_instructions: Some(String::new()),
                ..Default::default()
            });
        }

        plan.text.style = style_for(&state.user_text);
        plan.text.instruction = format!("Answer in style={}.", style_name(plan.text.style));
        let instruction = plan.text.instruction.clone();

        Ok(StateUpdate {
            plan: Some(plan),
            text_instructions: Some(instruction),
            ..Default::default()
        })
    }
}
