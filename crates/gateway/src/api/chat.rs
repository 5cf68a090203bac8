//! `POST /api/chat/stream` — the streaming chat endpoint.
//!
//! Builds the run state snapshot from the session, spawns the turn
//! driver (and, on likely tool turns, the initial meta block alongside
//! it), and encodes the event bus as `text/event-stream`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;

use mf_domain::constants::{MAX_USER_CHARS, SSE_RETRY_MS};
use mf_domain::event::SseEvent;
use mf_domain::state::RunState;
use mf_providers::registry::normalize;

use crate::bus;
use crate::graph::{self, meta, GraphCx};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatIn {
    pub session_id: String,
    pub provider: String,
    pub model: String,
    pub text: String,
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

pub async fn chat_stream(State(state): State<AppState>, Json(body): Json<ChatIn>) -> impl IntoResponse {
    state.sessions.cleanup();

    if body.text.chars().count() > MAX_USER_CHARS {
        return (
            axum::http::StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("message exceeds {MAX_USER_CHARS} characters")})),
        )
            .into_response();
    }

    let (provider, model) = match normalize(Some(&body.provider), Some(&body.model)) {
        Ok(pair) => pair,
        Err(e) => {
            return (
                axum::http::StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let entry = state.sessions.resolve(&body.session_id);
    let run_id = short_id();
    let trace_id = short_id();
    let (emitter, rx) = bus::channel(&run_id, Some(trace_id.clone()));

    let mut run_state = RunState::new(&body.session_id, &run_id, &body.text);
    run_state.trace_id = Some(trace_id);
    run_state.attachments = entry.attachments;
    run_state.chat_history = entry.chat_history;
    run_state.artifact_memory = entry.artifact_memory;
    run_state.last_image_prompt = entry.last_image_prompt;

    let likely_tool_turn = meta::likely_tool_turn(&body.text, !run_state.attachments.is_empty());
    run_state.initial_meta_emitted = likely_tool_turn;

    let cancel = state.cancel_map.register(&body.session_id);
    let cx = GraphCx {
        config: state.config.clone(),
        registry: state.registry.clone(),
        services: state.services.clone(),
        emitter: emitter.clone(),
        provider: provider.clone(),
        model: model.clone(),
        cancel,
    };

    let graph_ref = state.graph.clone();
    let sessions = state.sessions.clone();
    let cancel_map = state.cancel_map.clone();
    let session_id = body.session_id.clone();
    let user_text = body.text.clone();

    tokio::spawn(async move {
        // The initial meta block streams concurrently with planning so
        // the client sees movement before the first lane completes.
        let meta_fut = async {
            if likely_tool_turn {
                meta::stream_initial_block(
                    &cx.emitter,
                    &user_text,
                    &cx.provider,
                    &cx.model,
                    &cx.config,
                    &cx.registry,
                )
                .await;
            }
        };
        let run_fut = graph::run_turn(&graph_ref, &cx, run_state);
        let ((), out) = tokio::join!(meta_fut, run_fut);

        sessions.commit_turn(
            &session_id,
            &user_text,
            &out.final_text,
            out.artifact_memory,
            out.last_image_prompt,
        );
        cancel_map.remove(&session_id);
        cx.emitter.close().await;
    });

    let mut response = Sse::new(encode_stream(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache, no-transform".parse().expect("static header"));
    headers.insert(header::CONNECTION, "keep-alive".parse().expect("static header"));
    headers.insert("X-Accel-Buffering", "no".parse().expect("static header"));
    response
}

/// Drain the bus into SSE records until the sentinel.
fn encode_stream(
    mut rx: tokio::sync::mpsc::Receiver<Option<SseEvent>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        // Advertise the reconnect delay before any payload.
        yield Ok(Event::default().retry(Duration::from_millis(SSE_RETRY_MS)));

        while let Some(item) = rx.recv().await {
            let Some(ev) = item else { break };
            let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".into());
            yield Ok(Event::default().event("message").data(data));
        }
    }
}
