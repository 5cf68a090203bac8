//! HTTP surface: chat streaming, uploads, assets, models, session
//! meta/clear.

pub mod assets;
pub mod chat;
pub mod models;
pub mod session;
pub mod upload;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat/stream", post(chat::chat_stream))
        .route("/api/upload", post(upload::upload))
        .route("/api/uploads/:session_id", get(upload::list_uploads))
        .route("/api/uploads/:session_id/:attachment_id", delete(upload::remove_upload))
        .route("/api/assets/:session_id/:filename", get(assets::asset))
        .route("/api/models", get(models::models))
        .route("/api/session/meta", get(session::meta))
        .route("/api/session/clear", post(session::clear))
        .layer(cors)
        .with_state(state)
}
