//! Concrete lane tasks materialized by the tool router.
//!
//! `TaskSpec` is a tagged sum type: the `kind` field discriminates on
//! the wire and per-variant fields are validated by serde. Workers
//! match on the variant; unknown kinds fail deserialization instead of
//! reaching dispatch.

use serde::{Deserialize, Serialize};

use crate::plan::WebSource;

/// Image output size accepted by the image lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "512x512")]
    Square512,
    #[serde(rename = "1024x1024")]
    Square1024,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::Square512 => "512x512",
            ImageSize::Square1024 => "1024x1024",
        }
    }
}

/// What the doc lane should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocInstruction {
    Extract,
    Generate,
}

/// Output format for generated documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocFormat {
    Pdf,
    Doc,
    Txt,
    Md,
}

impl DocFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DocFormat::Pdf => "pdf",
            DocFormat::Doc => "doc",
            DocFormat::Txt => "txt",
            DocFormat::Md => "md",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            DocFormat::Pdf => "application/pdf",
            DocFormat::Doc => "application/msword",
            DocFormat::Txt => "text/plain",
            DocFormat::Md => "text/markdown",
        }
    }
}

/// Per-kind task payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    Text {
        prompt: String,
    },
    Web {
        query: String,
        top_k: usize,
        sources: Vec<WebSource>,
    },
    Rag {
        query: String,
        top_k: usize,
    },
    KbRag {
        query: String,
        top_k: usize,
    },
    Vision {
        prompt: String,
        image_attachment_id: String,
    },
    ImageGen {
        prompt: String,
        size: ImageSize,
        #[serde(default)]
        subject_lock: Option<String>,
    },
    Tts {
        text: String,
        voice: String,
    },
    Doc {
        instruction: DocInstruction,
        #[serde(default)]
        attachment_id: Option<String>,
        #[serde(default)]
        prompt: Option<String>,
        format: DocFormat,
    },
}

/// A task with its run-unique id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(flatten)]
    pub spec: TaskSpec,
}

impl Task {
    /// Mint a task with a short random id (the wire format uses 8 chars).
    pub fn new(spec: TaskSpec) -> Self {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        Self { id, spec }
    }

    pub fn kind(&self) -> &'static str {
        match self.spec {
            TaskSpec::Text { .. } => "text",
            TaskSpec::Web { .. } => "web",
            TaskSpec::Rag { .. } => "rag",
            TaskSpec::KbRag { .. } => "kb_rag",
            TaskSpec::Vision { .. } => "vision",
            TaskSpec::ImageGen { .. } => "image_gen",
            TaskSpec::Tts { .. } => "tts",
            TaskSpec::Doc { .. } => "doc",
        }
    }

    /// Primary text anchor used for deduplication.
    pub fn anchor(&self) -> &str {
        match &self.spec {
            TaskSpec::Text { prompt } => prompt,
            TaskSpec::Web { query, .. } => query,
            TaskSpec::Rag { query, .. } => query,
            TaskSpec::KbRag { query, .. } => query,
            TaskSpec::Vision { prompt, .. } => prompt,
            TaskSpec::ImageGen { prompt, .. } => prompt,
            TaskSpec::Tts { text, .. } => text,
            TaskSpec::Doc {
                prompt, instruction, ..
            } => prompt.as_deref().unwrap_or(match instruction {
                DocInstruction::Extract => "extract",
                DocInstruction::Generate => "generate",
            }),
        }
    }

    /// Whether this task belongs to the knowledge cohort (its output
    /// feeds the synthesizer) as opposed to the media cohort.
    pub fn is_knowledge(&self) -> bool {
        matches!(
            self.spec,
            TaskSpec::Web { .. }
                | TaskSpec::Rag { .. }
                | TaskSpec::KbRag { .. }
                | TaskSpec::Vision { .. }
        )
    }

    /// Human title shown on the task's stream block.
    pub fn title(&self) -> String {
        match &self.spec {
            TaskSpec::Web { sources, .. } => {
                if sources == &[WebSource::Arxiv] {
                    "Results from Arxiv".into()
                } else {
                    "Results from Web".into()
                }
            }
            TaskSpec::Rag { .. } => "RAG Context".into(),
            TaskSpec::KbRag { .. } => "Knowledge Base".into(),
            TaskSpec::ImageGen { .. } => "Generated Image".into(),
            TaskSpec::Tts { .. } => "Generated Audio".into(),
            TaskSpec::Doc { .. } => "Generated Document".into(),
            TaskSpec::Vision { .. } => "Vision Analysis".into(),
            TaskSpec::Text { .. } => "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_discriminates_on_the_wire() {
        let task = Task::new(TaskSpec::Web {
            query: "llm alignment".into(),
            top_k: 5,
            sources: vec![WebSource::Arxiv],
        });
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["kind"], "web");
        assert_eq!(v["sources"][0], "arxiv");

        let back: Task = serde_json::from_value(v).unwrap();
        assert_eq!(back.kind(), "web");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let raw = serde_json::json!({"id": "x1", "kind": "teleport", "query": "q"});
        assert!(serde_json::from_value::<Task>(raw).is_err());
    }

    #[test]
    fn arxiv_only_web_gets_arxiv_title() {
        let t = Task::new(TaskSpec::Web {
            query: "q".into(),
            top_k: 3,
            sources: vec![WebSource::Arxiv],
        });
        assert_eq!(t.title(), "Results from Arxiv");

        let t = Task::new(TaskSpec::Web {
            query: "q".into(),
            top_k: 3,
            sources: vec![WebSource::Tavily, WebSource::Wikipedia],
        });
        assert_eq!(t.title(), "Results from Web");
    }

    #[test]
    fn cohort_split_matches_kinds() {
        let knowledge = Task::new(TaskSpec::KbRag {
            query: "q".into(),
            top_k: 6,
        });
        assert!(knowledge.is_knowledge());

        let media = Task::new(TaskSpec::ImageGen {
            prompt: "a phoenix".into(),
            size: ImageSize::Square1024,
            subject_lock: None,
        });
        assert!(!media.is_knowledge());
    }

    #[test]
    fn anchor_prefers_primary_text_field() {
        let t = Task::new(TaskSpec::Tts {
            text: "hello".into(),
            voice: "alloy".into(),
        });
        assert_eq!(t.anchor(), "hello");

        let t = Task::new(TaskSpec::Doc {
            instruction: DocInstruction::Extract,
            attachment_id: Some("a1".into()),
            prompt: None,
            format: DocFormat::Pdf,
        });
        assert_eq!(t.anchor(), "extract");
    }
}
