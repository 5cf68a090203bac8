//! Session metadata and explicit clearing.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use mf_sessions::{server_boot_id, SESSION_TTL};

use crate::state::AppState;

/// `GET /api/session/meta` — the boot id lets clients detect process
/// restarts (session state does not survive them).
pub async fn meta(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "boot_id": server_boot_id(),
        "ttl_secs": SESSION_TTL.as_secs(),
        "active_sessions": state.sessions.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClearIn {
    pub session_id: String,
}

/// `POST /api/session/clear` — removes the session entry, cancels any
/// running turn, and detaches its stored assets.
pub async fn clear(State(state): State<AppState>, Json(body): Json<ClearIn>) -> impl IntoResponse {
    state.cancel_map.cancel(&body.session_id);
    let existed = state.sessions.clear(&body.session_id);

    let dir = state.config.uploads_dir().join(&body.session_id);
    if dir.is_dir() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(session_id = %body.session_id, error = %e, "asset dir cleanup failed");
        }
    }

    Json(serde_json::json!({"ok": true, "removed": existed}))
}
