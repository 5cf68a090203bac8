//! Per-turn run state and the partial updates graph nodes return.
//!
//! Nodes never mutate `RunState` directly: each returns a `StateUpdate`
//! and the graph runtime merges it with last-write-wins semantics at
//! top-level keys. Session-durable pieces (history, artifact memory,
//! last image prompt) are copied into the snapshot when a run starts
//! and written back by the driver after a successful turn.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::RunPlan;
use crate::result::ToolResult;
use crate::task::Task;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attachments & artifacts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Audio,
    Doc,
}

impl ArtifactKind {
    /// Infer the attachment kind from a MIME type prefix.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            ArtifactKind::Image
        } else if mime.starts_with("audio/") {
            ArtifactKind::Audio
        } else {
            ArtifactKind::Doc
        }
    }
}

/// A file uploaded into the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub mime: String,
    pub path: String,
}

/// The most recent produced artifact of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSlot {
    pub id: String,
    pub url: String,
    /// The generation prompt for images, the spoken/extracted text for
    /// audio and docs.
    #[serde(default)]
    pub prompt_or_text: String,
}

/// A parent→child edit edge in the artifact lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEdge {
    pub parent_id: String,
    pub child_id: String,
    pub op: String,
    pub ts_ms: i64,
}

/// Append-only lineage per artifact kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineage {
    #[serde(default)]
    pub image: Vec<LineageEdge>,
    #[serde(default)]
    pub audio: Vec<LineageEdge>,
    #[serde(default)]
    pub doc: Vec<LineageEdge>,
}

impl Lineage {
    pub fn edges(&self, kind: ArtifactKind) -> &[LineageEdge] {
        match kind {
            ArtifactKind::Image => &self.image,
            ArtifactKind::Audio => &self.audio,
            ArtifactKind::Doc => &self.doc,
        }
    }

    fn edges_mut(&mut self, kind: ArtifactKind) -> &mut Vec<LineageEdge> {
        match kind {
            ArtifactKind::Image => &mut self.image,
            ArtifactKind::Audio => &mut self.audio,
            ArtifactKind::Doc => &mut self.doc,
        }
    }

    /// Walk parents from `id`; true when `ancestor` is reachable.
    fn has_ancestor(&self, kind: ArtifactKind, id: &str, ancestor: &str) -> bool {
        let edges = self.edges(kind);
        let mut cursor = id.to_string();
        // Bounded walk; the edge list is append-only so depth ≤ len.
        for _ in 0..=edges.len() {
            let Some(edge) = edges.iter().find(|e| e.child_id == cursor) else {
                return false;
            };
            if edge.parent_id == ancestor {
                return true;
            }
            cursor = edge.parent_id.clone();
        }
        false
    }

    /// Append an edit edge. Self-edges and edges that would close a
    /// cycle are refused.
    pub fn push_edge(&mut self, kind: ArtifactKind, parent_id: &str, child_id: &str, op: &str) -> bool {
        if parent_id == child_id || self.has_ancestor(kind, parent_id, child_id) {
            tracing::warn!(parent_id, child_id, "refusing lineage edge that would form a cycle");
            return false;
        }
        self.edges_mut(kind).push(LineageEdge {
            parent_id: parent_id.to_string(),
            child_id: child_id.to_string(),
            op: op.to_string(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
        });
        true
    }
}

/// Typed artifact slots plus their edit lineage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMemory {
    pub image: Option<ArtifactSlot>,
    pub audio: Option<ArtifactSlot>,
    pub doc: Option<ArtifactSlot>,
    #[serde(default)]
    pub lineage: Lineage,
}

impl ArtifactMemory {
    pub fn slot(&self, kind: ArtifactKind) -> Option<&ArtifactSlot> {
        match kind {
            ArtifactKind::Image => self.image.as_ref(),
            ArtifactKind::Audio => self.audio.as_ref(),
            ArtifactKind::Doc => self.doc.as_ref(),
        }
    }

    pub fn set_slot(&mut self, kind: ArtifactKind, slot: ArtifactSlot) {
        match kind {
            ArtifactKind::Image => self.image = Some(slot),
            ArtifactKind::Audio => self.audio = Some(slot),
            ArtifactKind::Doc => self.doc = Some(slot),
        }
    }

    pub fn clear_slot(&mut self, kind: ArtifactKind) {
        match kind {
            ArtifactKind::Image => self.image = None,
            ArtifactKind::Audio => self.audio = None,
            ArtifactKind::Doc => self.doc = None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intent & runtime plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Create,
    Edit,
    Analyze,
    Retrieve,
    Chat,
}

/// Classified intent for the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub intent_type: IntentType,
    pub target_modality: String,
    pub confidence: f64,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            intent_type: IntentType::Chat,
            target_modality: "text".into(),
            confidence: 0.7,
        }
    }
}

/// Iteration caps and replan budget for the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRuntime {
    pub iteration: u32,
    pub max_iterations: u32,
    pub max_replans: u32,
    pub max_rewrites: u32,
    #[serde(default)]
    pub subject_lock: Option<String>,
    #[serde(default)]
    pub replan_requested: bool,
    #[serde(default)]
    pub replan_reason: String,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failed_count: u32,
}

impl Default for PlanRuntime {
    fn default() -> Self {
        Self {
            iteration: 0,
            max_iterations: 1,
            max_replans: 0,
            max_rewrites: 1,
            subject_lock: None,
            replan_requested: false,
            replan_reason: String::new(),
            success_count: 0,
            failed_count: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context, contract, breadcrumbs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap context facts derived before classification.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub has_last_image: bool,
    pub is_image_edit: bool,
}

/// Pointer into artifact memory this turn operates on (image edits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedArtifact {
    pub kind: ArtifactKind,
    pub id: String,
    pub prompt: String,
    pub url: String,
}

/// Compact researcher/writer/critic contract fed to the synthesizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseContract {
    #[serde(default)]
    pub researcher_brief: String,
    #[serde(default)]
    pub writer_plan: String,
    #[serde(default)]
    pub critic_checks: String,
}

impl ResponseContract {
    pub fn is_empty(&self) -> bool {
        self.researcher_brief.is_empty()
            && self.writer_plan.is_empty()
            && self.critic_checks.is_empty()
    }
}

/// Lane completion summary computed after a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CheckerSummary {
    pub requested_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub has_main_text: bool,
}

/// One breadcrumb note recorded by a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentNote {
    pub ts_ms: i64,
    pub node: String,
    pub summary: String,
    #[serde(default)]
    pub extra: Value,
}

/// Bounded ring of node breadcrumbs for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMemory {
    #[serde(default)]
    pub notes: Vec<AgentNote>,
}

/// Keep at most this many breadcrumbs per run.
pub const MAX_AGENT_NOTES: usize = 120;

impl AgentMemory {
    pub fn push_note(&mut self, node: &str, summary: &str, extra: Value) {
        self.notes.push(AgentNote {
            ts_ms: chrono::Utc::now().timestamp_millis(),
            node: node.to_string(),
            summary: summary.to_string(),
            extra,
        });
        if self.notes.len() > MAX_AGENT_NOTES {
            let overflow = self.notes.len() - MAX_AGENT_NOTES;
            self.notes.drain(..overflow);
        }
    }
}

/// One entry of chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunState & StateUpdate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The full per-turn state snapshot threaded through the graph.
#[derive(Debug, Clone)]
pub struct RunState {
    pub session_id: String,
    pub run_id: String,
    pub trace_id: Option<String>,

    pub user_text: String,
    /// User text with matched tool clauses stripped; what the
    /// synthesizer actually answers.
    pub text_query: String,
    pub attachments: Vec<Attachment>,
    pub chat_history: Vec<ChatMessage>,

    pub artifact_memory: ArtifactMemory,
    pub context_bundle: ContextBundle,
    pub linked_artifact: Option<LinkedArtifact>,
    pub last_image_prompt: Option<String>,

    pub intent: Intent,
    pub plan: RunPlan,
    pub plan_runtime: PlanRuntime,
    pub tasks: Vec<Task>,
    pub tool_outputs: HashMap<String, ToolResult>,
    pub response_contract: ResponseContract,
    pub text_instructions: String,
    pub agent_memory: AgentMemory,
    pub final_text: String,
    pub checker: CheckerSummary,
    /// True when the route-level initial meta block already streamed.
    pub initial_meta_emitted: bool,
}

impl RunState {
    pub fn new(session_id: impl Into<String>, run_id: impl Into<String>, user_text: impl Into<String>) -> Self {
        let user_text = user_text.into();
        Self {
            session_id: session_id.into(),
            run_id: run_id.into(),
            trace_id: None,
            text_query: user_text.clone(),
            user_text,
            attachments: Vec::new(),
            chat_history: Vec::new(),
            artifact_memory: ArtifactMemory::default(),
            context_bundle: ContextBundle::default(),
            linked_artifact: None,
            last_image_prompt: None,
            intent: Intent::default(),
            plan: RunPlan::default(),
            plan_runtime: PlanRuntime::default(),
            tasks: Vec::new(),
            tool_outputs: HashMap::new(),
            response_contract: ResponseContract::default(),
            text_instructions: String::new(),
            agent_memory: AgentMemory::default(),
            final_text: String::new(),
            checker: CheckerSummary::default(),
            initial_meta_emitted: false,
        }
    }

    /// Merge a node's partial update, last write wins per key.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(v) = update.text_query {
            self.text_query = v;
        }
        if let Some(v) = update.context_bundle {
            self.context_bundle = v;
        }
        if let Some(v) = update.linked_artifact {
            self.linked_artifact = v;
        }
        if let Some(v) = update.intent {
            self.intent = v;
        }
        if let Some(v) = update.plan {
            self.plan = v;
        }
        if let Some(v) = update.plan_runtime {
            self.plan_runtime = v;
        }
        if let Some(v) = update.tasks {
            self.tasks = v;
        }
        if let Some(v) = update.tool_outputs {
            self.tool_outputs = v;
        }
        if let Some(v) = update.response_contract {
            self.response_contract = v;
        }
        if let Some(v) = update.text_instructions {
            self.text_instructions = v;
        }
        if let Some(v) = update.artifact_memory {
            self.artifact_memory = v;
        }
        if let Some(v) = update.last_image_prompt {
            self.last_image_prompt = Some(v);
        }
        if let Some(v) = update.final_text {
            self.final_text = v;
        }
        if let Some(v) = update.checker {
            self.checker = v;
        }
        for (node, summary, extra) in update.notes {
            self.agent_memory.push_note(&node, &summary, extra);
        }
    }
}

/// A partial update to `RunState`. `None` leaves the key untouched.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub text_query: Option<String>,
    pub context_bundle: Option<ContextBundle>,
    /// `Some(None)` clears the link, `None` leaves it untouched.
    pub linked_artifact: Option<Option<LinkedArtifact>>,
    pub intent: Option<Intent>,
    pub plan: Option<RunPlan>,
    pub plan_runtime: Option<PlanRuntime>,
    pub tasks: Option<Vec<Task>>,
    pub tool_outputs: Option<HashMap<String, ToolResult>>,
    pub response_contract: Option<ResponseContract>,
    pub text_instructions: Option<String>,
    pub artifact_memory: Option<ArtifactMemory>,
    pub last_image_prompt: Option<String>,
    pub final_text: Option<String>,
    pub checker: Option<CheckerSummary>,
    /// Breadcrumbs appended (not replaced) on merge.
    pub notes: Vec<(String, String, Value)>,
}

impl StateUpdate {
    pub fn note(mut self, node: &str, summary: &str, extra: Value) -> Self {
        self.notes.push((node.into(), summary.into(), extra));
        self
    }
}
