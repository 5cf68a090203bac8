//! Process-local session state for Manifold.
//!
//! Sessions hold chat history, uploaded attachments, and the artifact
//! memory produced by media lanes. They are created on first reference
//! and evicted after a TTL of inactivity; nothing survives a restart
//! (clients detect restarts via the server boot id).

mod store;

pub use store::{server_boot_id, SessionEntry, SessionStore, SESSION_TTL};
