//! Run acknowledgement: the graph's entry breadcrumb.

use mf_domain::error::Result;
use mf_domain::state::{RunState, StateUpdate};
use serde_json::Value;

use crate::graph::runner::Node;
use crate::graph::GraphCx;

pub struct AckNode;

#[async_trait::async_trait]
impl Node for AckNode {
    fn name(&self) -> &'static str {
        "ack"
    }

    async fn run(&self, _state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
        Ok(StateUpdate::default().note("ack", "Run acknowledged", Value::Null))
    }
}
