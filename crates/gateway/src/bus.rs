//! The per-run event bus: a single bounded channel collecting events
//! from all producers, drained by one SSE encoder.
//!
//! Back-pressure policy: token events (`token`, `block_token`) are
//! dropped when the queue is full; structural events wait up to a
//! deadline before being abandoned. A `None` sentinel terminates the
//! stream after the run completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use mf_domain::event::{EventType, SseEvent};

/// Queue capacity per run.
pub const BUS_CAPACITY: usize = 256;

/// Longest a producer may wait on a full queue for a structural event.
pub const STRUCTURAL_SEND_DEADLINE: Duration = Duration::from_secs(5);

/// Create the bus for one run.
pub fn channel(run_id: &str, trace_id: Option<String>) -> (Emitter, mpsc::Receiver<Option<SseEvent>>) {
    let (tx, rx) = mpsc::channel(BUS_CAPACITY);
    (
        Emitter {
            run_id: run_id.to_string(),
            trace_id,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Cloneable producer handle carrying the run/trace identifiers.
#[derive(Clone)]
pub struct Emitter {
    run_id: String,
    trace_id: Option<String>,
    tx: mpsc::Sender<Option<SseEvent>>,
    dropped: Arc<AtomicU64>,
}

impl Emitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Enqueue one event. Token events are dropped on overflow;
    /// structural events wait up to the deadline.
    pub async fn emit(&self, event_type: EventType, data: Value) {
        let ev = SseEvent::new(event_type, &self.run_id, self.trace_id.clone(), data);

        if event_type.is_droppable() {
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(Some(ev)) {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 64 == 1 {
                    tracing::warn!(run_id = %self.run_id, dropped, "dropping token events on full bus");
                }
            }
            return;
        }

        match tokio::time::timeout(STRUCTURAL_SEND_DEADLINE, self.tx.send(Some(ev))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // Consumer is gone (client disconnected); nothing to do.
                tracing::debug!(run_id = %self.run_id, "event bus closed, event discarded");
            }
            Err(_) => {
                tracing::error!(run_id = %self.run_id, ?event_type, "structural event abandoned after send deadline");
            }
        }
    }

    /// Enqueue the termination sentinel; the encoder stops at it.
    pub async fn close(&self) {
        let _ = self.tx.send(None).await;
    }

    /// Token events dropped on overflow so far.
    pub fn dropped_tokens(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_preserve_enqueue_order() {
        let (emitter, mut rx) = channel("r1", None);
        emitter
            .emit(EventType::RunStart, serde_json::json!({"session_id": "s1"}))
            .await;
        emitter.emit(EventType::Token, serde_json::json!({"text": "a"})).await;
        emitter.emit(EventType::RunEnd, serde_json::json!({"ok": true})).await;
        emitter.close().await;

        let mut types = Vec::new();
        while let Some(Some(ev)) = rx.recv().await {
            types.push(ev.event_type);
        }
        assert_eq!(
            types,
            vec![EventType::RunStart, EventType::Token, EventType::RunEnd]
        );
    }

    #[tokio::test]
    async fn token_events_drop_on_overflow_but_structural_survive() {
        let (emitter, mut rx) = channel("r1", None);

        // Fill the queue past capacity with droppable tokens.
        for i in 0..BUS_CAPACITY + 50 {
            emitter
                .emit(EventType::Token, serde_json::json!({"text": format!("t{i}")}))
                .await;
        }
        assert!(emitter.dropped_tokens() >= 50);

        // Drain one slot, then a structural event must still arrive.
        let _ = rx.recv().await;
        emitter
            .emit(EventType::BlockEnd, serde_json::json!({"block_id": "b1"}))
            .await;
        drop(emitter);

        let mut saw_block_end = false;
        while let Some(item) = rx.recv().await {
            if let Some(ev) = item {
                if ev.event_type == EventType::BlockEnd {
                    saw_block_end = true;
                }
            }
        }
        assert!(saw_block_end);
    }

    #[tokio::test]
    async fn close_terminates_the_stream() {
        let (emitter, mut rx) = channel("r1", None);
        emitter.close().await;
        assert!(matches!(rx.recv().await, Some(None)));
    }
}
