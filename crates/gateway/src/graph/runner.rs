//! The planner graph runtime.
//!
//! Nodes are pure transformers: each receives the current state
//! snapshot and returns a partial update the runtime merges. Edges are
//! either direct or conditional (a selector over a fixed label set).
//! Topology is fixed at build time; compilation validates every edge
//! target.

use std::collections::HashMap;

use mf_domain::error::{Error, Result};
use mf_domain::state::{RunState, StateUpdate};

use super::GraphCx;

/// Terminal label ending traversal.
pub const END: &str = "end";

/// Safety cap on traversal steps, far above any legal walk (the replan
/// loop is already bounded by `plan_runtime.max_iterations`).
const MAX_STEPS: usize = 64;

/// A graph node: a named, pure state transformer.
#[async_trait::async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: &RunState, cx: &GraphCx) -> Result<StateUpdate>;
}

/// Outgoing edge of a node.
pub enum Edge {
    Direct(&'static str),
    Select {
        select: fn(&RunState) -> &'static str,
        targets: &'static [&'static str],
    },
}

/// A compiled, immutable graph.
pub struct Graph {
    entry: &'static str,
    nodes: HashMap<&'static str, Box<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder validating the topology on `compile`.
#[derive(Default)]
pub struct GraphBuilder {
    entry: Option<&'static str>,
    nodes: HashMap<&'static str, Box<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: Box<dyn Node>) -> Self {
        self.nodes.insert(node.name(), node);
        self
    }

    pub fn entry(mut self, name: &'static str) -> Self {
        self.entry = Some(name);
        self
    }

    pub fn edge(mut self, from: &'static str, to: &'static str) -> Self {
        self.edges.insert(from, Edge::Direct(to));
        self
    }

    pub fn conditional_edge(
        mut self,
        from: &'static str,
        select: fn(&RunState) -> &'static str,
        targets: &'static [&'static str],
    ) -> Self {
        self.edges.insert(from, Edge::Select { select, targets });
        self
    }

    /// Validate that the entry and every edge target resolve to a
    /// registered node (or the terminal label).
    pub fn compile(self) -> Result<Graph> {
        let entry = self
            .entry
            .ok_or_else(|| Error::Validation("graph has no entry point".into()))?;
        if !self.nodes.contains_key(entry) {
            return Err(Error::Validation(format!("entry node '{entry}' is not registered")));
        }

        let check = |from: &str, target: &str| -> Result<()> {
            if target != END && !self.nodes.contains_key(target) {
                return Err(Error::Validation(format!(
                    "edge {from} -> {target}: target is not a registered node"
                )));
            }
            Ok(())
        };

        for (from, edge) in &self.edges {
            match edge {
                Edge::Direct(to) => check(from, to)?,
                Edge::Select { targets, .. } => {
                    if targets.is_empty() {
                        return Err(Error::Validation(format!(
                            "conditional edge from {from} has no targets"
                        )));
                    }
                    for t in *targets {
                        check(from, t)?;
                    }
                }
            }
        }

        Ok(Graph {
            entry,
            nodes: self.nodes,
            edges: self.edges,
        })
    }
}

impl Graph {
    /// Traverse from the entry, merging node updates, until a terminal
    /// is reached.
    pub async fn run(&self, state: &mut RunState, cx: &GraphCx) -> Result<()> {
        let mut current = self.entry;

        for _step in 0..MAX_STEPS {
            let node = self
                .nodes
                .get(current)
                .ok_or_else(|| Error::Validation(format!("node '{current}' missing at runtime")))?;

            tracing::info!(node = current, run_id = %state.run_id, "node call");
            let update = node.run(state, cx).await?;
            state.apply(update);

            let next = match self.edges.get(current) {
                None => END,
                Some(Edge::Direct(to)) => *to,
                Some(Edge::Select { select, targets }) => {
                    let label = select(state);
                    if label != END && !targets.contains(&label) {
                        return Err(Error::Validation(format!(
                            "selector at '{current}' chose unknown label '{label}'"
                        )));
                    }
                    label
                }
            };

            if next == END {
                return Ok(());
            }
            current = next;
        }

        Err(Error::Other(format!("graph exceeded {MAX_STEPS} steps")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::test_cx;
    use serde_json::Value;

    struct NoteNode(&'static str);

    #[async_trait::async_trait]
    impl Node for NoteNode {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn run(&self, _state: &RunState, _cx: &GraphCx) -> Result<StateUpdate> {
            Ok(StateUpdate::default().note(self.0, "visited", Value::Null))
        }
    }

    fn visited(state: &RunState) -> Vec<String> {
        state.agent_memory.notes.iter().map(|n| n.node.clone()).collect()
    }

    #[tokio::test]
    async fn linear_walk_visits_every_node() {
        let graph = GraphBuilder::new()
            .node(Box::new(NoteNode("a")))
            .node(Box::new(NoteNode("b")))
            .entry("a")
            .edge("a", "b")
            .edge("b", END)
            .compile()
            .unwrap();

        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "hello");
        graph.run(&mut state, &cx).await.unwrap();
        assert_eq!(visited(&state), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn conditional_edge_selects_by_state() {
        fn pick(state: &RunState) -> &'static str {
            if state.user_text.contains("left") {
                "left"
            } else {
                "right"
            }
        }

        let graph = GraphBuilder::new()
            .node(Box::new(NoteNode("root")))
            .node(Box::new(NoteNode("left")))
            .node(Box::new(NoteNode("right")))
            .entry("root")
            .conditional_edge("root", pick, &["left", "right"])
            .edge("left", END)
            .edge("right", END)
            .compile()
            .unwrap();

        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "go left");
        graph.run(&mut state, &cx).await.unwrap();
        assert_eq!(visited(&state), vec!["root", "left"]);
    }

    #[test]
    fn compile_rejects_unknown_targets() {
        let err = GraphBuilder::new()
            .node(Box::new(NoteNode("a")))
            .entry("a")
            .edge("a", "ghost")
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn compile_rejects_missing_entry() {
        let err = GraphBuilder::new().node(Box::new(NoteNode("a"))).compile().unwrap_err();
        assert!(err.to_string().contains("no entry"));
    }

    #[tokio::test]
    async fn runaway_loop_is_capped() {
        let graph = GraphBuilder::new()
            .node(Box::new(NoteNode("a")))
            .entry("a")
            .edge("a", "a")
            .compile()
            .unwrap();

        let (cx, _rx) = test_cx().await;
        let mut state = RunState::new("s1", "r1", "hello");
        let err = graph.run(&mut state, &cx).await.unwrap_err();
        assert!(err.to_string().contains("steps"));
    }
}
