//! In-memory session store with TTL eviction.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use mf_domain::constants::{MAX_ATTACHMENTS, MAX_HISTORY_MESSAGES};
use mf_domain::state::{ArtifactKind, ArtifactMemory, Attachment, ChatMessage};

/// Sessions idle longer than this are evicted.
pub const SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Minted once per process; lets clients detect a restart (and thus
/// the loss of all session state).
pub fn server_boot_id() -> &'static str {
    static BOOT_ID: OnceLock<String> = OnceLock::new();
    BOOT_ID.get_or_init(|| {
        let short = &uuid::Uuid::new_v4().to_string()[..8];
        format!("boot_{}_{}", chrono::Utc::now().timestamp(), short)
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything tracked for one session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub chat_history: Vec<ChatMessage>,
    pub attachments: Vec<Attachment>,
    pub artifact_memory: ArtifactMemory,
    pub last_image_prompt: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub touched_at: Instant,
}

impl SessionEntry {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_history: Vec::new(),
            attachments: Vec::new(),
            artifact_memory: ArtifactMemory::default(),
            last_image_prompt: None,
            created_at: chrono::Utc::now(),
            touched_at: Instant::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session map keyed by the opaque client-provided session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a snapshot of a session, creating it on first reference.
    /// Touches the activity timestamp.
    pub fn resolve(&self, session_id: &str) -> SessionEntry {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id, "new session created");
                SessionEntry::new(session_id)
            });
        entry.touched_at = Instant::now();
        entry.clone()
    }

    /// Fetch without creating.
    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Drop sessions idle past the TTL.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.touched_at) <= SESSION_TTL);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, "evicted idle sessions");
        }
    }

    /// Remove a session outright. Returns true if it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    // ── Turn commit ───────────────────────────────────────────────

    /// Write back the results of a completed turn: append the user and
    /// assistant messages, truncate history, and replace artifact state
    /// produced during the run.
    pub fn commit_turn(
        &self,
        session_id: &str,
        user_text: &str,
        final_text: &str,
        artifact_memory: ArtifactMemory,
        last_image_prompt: Option<String>,
    ) {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(session_id));

        entry.chat_history.push(ChatMessage::user(user_text));
        if !final_text.trim().is_empty() {
            entry.chat_history.push(ChatMessage::assistant(final_text));
        }
        if entry.chat_history.len() > MAX_HISTORY_MESSAGES {
            let overflow = entry.chat_history.len() - MAX_HISTORY_MESSAGES;
            entry.chat_history.drain(..overflow);
        }

        entry.artifact_memory = artifact_memory;
        if let Some(prompt) = last_image_prompt {
            entry.last_image_prompt = Some(prompt);
        }
        entry.touched_at = Instant::now();
    }

    // ── Attachments ───────────────────────────────────────────────

    /// Register an uploaded attachment. Enforces the per-session cap.
    pub fn add_attachment(&self, session_id: &str, attachment: Attachment) -> mf_domain::Result<()> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry::new(session_id));

        if entry.attachments.len() >= MAX_ATTACHMENTS {
            return Err(mf_domain::Error::Validation(format!(
                "attachment limit reached ({MAX_ATTACHMENTS})"
            )));
        }
        entry.attachments.push(attachment);
        entry.touched_at = Instant::now();
        Ok(())
    }

    /// Remove an attachment, clearing the matching artifact slot.
    /// Returns the removed record so the caller can unlink the file.
    pub fn remove_attachment(&self, session_id: &str, attachment_id: &str) -> Option<Attachment> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(session_id)?;

        let idx = entry.attachments.iter().position(|a| a.id == attachment_id)?;
        let removed = entry.attachments.remove(idx);

        match removed.kind {
            ArtifactKind::Doc => entry.artifact_memory.clear_slot(ArtifactKind::Doc),
            ArtifactKind::Image => entry.artifact_memory.clear_slot(ArtifactKind::Image),
            ArtifactKind::Audio => {}
        }
        entry.touched_at = Instant::now();
        Some(removed)
    }

    pub fn attachments(&self, session_id: &str) -> Vec<Attachment> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.attachments.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_domain::state::ArtifactSlot;

    fn attachment(id: &str, mime: &str) -> Attachment {
        Attachment {
            id: id.into(),
            kind: ArtifactKind::from_mime(mime),
            name: format!("{id}.bin"),
            mime: mime.into(),
            path: format!("/tmp/{id}.bin"),
        }
    }

    #[test]
    fn resolve_creates_once() {
        let store = SessionStore::new();
        let a = store.resolve("s1");
        let b = store.resolve("s1");
        assert_eq!(a.session_id, b.session_id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn commit_turn_appends_and_truncates_history() {
        let store = SessionStore::new();
        for i in 0..40 {
            store.commit_turn(
                "s1",
                &format!("q{i}"),
                &format!("a{i}"),
                ArtifactMemory::default(),
                None,
            );
        }
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.chat_history.len(), MAX_HISTORY_MESSAGES);
        // The newest turn survives truncation.
        assert_eq!(entry.chat_history.last().unwrap().content, "a39");
    }

    #[test]
    fn commit_turn_skips_empty_assistant_text() {
        let store = SessionStore::new();
        store.commit_turn("s1", "make an image", "", ArtifactMemory::default(), None);
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.chat_history.len(), 1);
        assert_eq!(entry.chat_history[0].role, "user");
    }

    #[test]
    fn commit_turn_keeps_previous_image_prompt_when_none() {
        let store = SessionStore::new();
        store.commit_turn(
            "s1",
            "draw an owl",
            "done",
            ArtifactMemory::default(),
            Some("a minimal owl logo".into()),
        );
        store.commit_turn("s1", "thanks", "welcome", ArtifactMemory::default(), None);
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.last_image_prompt.as_deref(), Some("a minimal owl logo"));
    }

    #[test]
    fn attachment_cap_is_enforced() {
        let store = SessionStore::new();
        for i in 0..MAX_ATTACHMENTS {
            store
                .add_attachment("s1", attachment(&format!("a{i}"), "application/pdf"))
                .unwrap();
        }
        let err = store.add_attachment("s1", attachment("overflow", "application/pdf"));
        assert!(err.is_err());
    }

    #[test]
    fn remove_attachment_clears_matching_slot() {
        let store = SessionStore::new();
        store.add_attachment("s1", attachment("d1", "application/pdf")).unwrap();

        let mut memory = ArtifactMemory::default();
        memory.set_slot(
            ArtifactKind::Doc,
            ArtifactSlot {
                id: "d1".into(),
                url: "/api/assets/s1/d1".into(),
                prompt_or_text: "doc text".into(),
            },
        );
        store.commit_turn("s1", "q", "a", memory, None);

        let removed = store.remove_attachment("s1", "d1").unwrap();
        assert_eq!(removed.id, "d1");
        let entry = store.get("s1").unwrap();
        assert!(entry.artifact_memory.doc.is_none());
        assert!(entry.attachments.is_empty());
    }

    #[test]
    fn clear_removes_session() {
        let store = SessionStore::new();
        store.resolve("s1");
        assert!(store.clear("s1"));
        assert!(!store.clear("s1"));
        assert!(store.get("s1").is_none());
    }

    #[test]
    fn boot_id_is_stable_within_process() {
        assert_eq!(server_boot_id(), server_boot_id());
        assert!(server_boot_id().starts_with("boot_"));
    }
}
