//! Lane workers: thin adapters over external services, each returning
//! the uniform `ToolResult` envelope.
//!
//! The executor dispatches every task through [`worker::run_task`];
//! worker failures are converted to `ok:false` results there and never
//! abort the run.

pub mod arxiv;
pub mod assets;
pub mod doc;
pub mod docgen;
pub mod image;
pub mod kb_rag;
pub mod rag;
pub mod tavily;
pub mod tts;
pub mod vision;
pub mod web;
pub mod wiki;
pub mod worker;

pub use worker::{run_task, LaneContext, LaneServices};
