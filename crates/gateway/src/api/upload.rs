//! Attachment upload and management.

use axum::extract::{Multipart, Path, State};
use axum::response::IntoResponse;
use axum::Json;

use mf_domain::state::{ArtifactKind, Attachment};
use mf_lanes::assets::safe_filename;

use crate::state::AppState;

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        axum::http::StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// `POST /api/upload` — multipart fields `session_id` and `f`.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let mut session_id: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return bad_request(&format!("malformed multipart body: {e}")),
        };
        match field.name() {
            Some("session_id") => match field.text().await {
                Ok(text) => session_id = Some(text),
                Err(e) => return bad_request(&format!("reading session_id: {e}")),
            },
            Some("f") => {
                let name = field.file_name().unwrap_or("upload.bin").to_string();
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                match field.bytes().await {
                    Ok(bytes) => file = Some((name, mime, bytes.to_vec())),
                    Err(e) => return bad_request(&format!("reading file: {e}")),
                }
            }
            _ => {}
        }
    }

    let Some(session_id) = session_id else {
        return bad_request("missing field: session_id");
    };
    let Some((name, mime, bytes)) = file else {
        return bad_request("missing field: f");
    };

    let fid = short_id();
    let dir = state.config.uploads_dir().join(&session_id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return bad_request(&format!("creating upload dir: {e}"));
    }
    let path = dir.join(format!("{fid}_{}", safe_filename(&name)));
    if let Err(e) = std::fs::write(&path, &bytes) {
        return bad_request(&format!("writing upload: {e}"));
    }

    let attachment = Attachment {
        id: fid,
        kind: ArtifactKind::from_mime(&mime),
        name,
        mime,
        path: path.display().to_string(),
    };

    if let Err(e) = state.sessions.add_attachment(&session_id, attachment.clone()) {
        let _ = std::fs::remove_file(&path);
        return bad_request(&e.to_string());
    }

    tracing::info!(session_id, attachment_id = %attachment.id, kind = ?attachment.kind, "attachment stored");
    Json(attachment).into_response()
}

/// `GET /api/uploads/{session_id}`
pub async fn list_uploads(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({"attachments": state.sessions.attachments(&session_id)}))
}

/// `DELETE /api/uploads/{session_id}/{attachment_id}` — removes the
/// attachment, clears the matching artifact slot, and best-effort
/// unlinks the file.
pub async fn remove_upload(
    State(state): State<AppState>,
    Path((session_id, attachment_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.sessions.remove_attachment(&session_id, &attachment_id) {
        Some(removed) => {
            let path = std::path::Path::new(&removed.path);
            if path.is_file() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %removed.path, error = %e, "attachment unlink failed");
                }
            }
            Json(serde_json::json!({"ok": true, "removed_id": attachment_id})).into_response()
        }
        None => (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Attachment not found"})),
        )
            .into_response(),
    }
}
