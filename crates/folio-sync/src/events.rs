//! Engine event bus.
//!
//! The engine talks to the UI and storage layers exclusively through
//! events. Most are fire-and-forget; sync requests are *acknowledged*: the
//! emitter waits (bounded) until at least one subscriber reports that it
//! processed the event without error.

use crate::error::EmitError;
use folio_core::{Document, DocumentId, Record, Theme, ViewState};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

/// Events the engine exposes to its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    DocumentLoaded {
        document: Document,
    },
    /// Must be acknowledged for a save to count as accepted.
    #[serde(rename_all = "camelCase")]
    DocumentSyncRequested {
        records: Vec<Record>,
        view_state: ViewState,
        document_id: DocumentId,
    },
    FileNameDisplayUpdated {
        name: String,
    },
    ErrorOccurred {
        message: String,
        details: Value,
    },
    ThemeChanged {
        theme: Theme,
    },
    /// The host may reload its environment; the engine has already reset
    /// its own orchestration state.
    #[serde(rename_all = "camelCase")]
    ReloadRequested {
        document_id: DocumentId,
    },
}

impl EngineEvent {
    pub fn error(message: impl Into<String>, details: Value) -> Self {
        EngineEvent::ErrorOccurred {
            message: message.into(),
            details,
        }
    }
}

// ─── Delivery ────────────────────────────────────────────────────────────

type AckResult = Result<(), String>;

/// One event as seen by one subscriber.
///
/// For acknowledged events, dropping the delivery without calling
/// [`Delivery::acknowledge`] counts as a rejection.
#[derive(Debug)]
pub struct Delivery {
    pub event: EngineEvent,
    ack: Option<mpsc::UnboundedSender<AckResult>>,
}

impl Delivery {
    pub fn wants_ack(&self) -> bool {
        self.ack.is_some()
    }

    pub fn acknowledge(mut self, result: AckResult) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(result);
        }
    }

    /// Leave the acknowledgement to other subscribers. Observers that only
    /// log or display events should end with this.
    pub fn withdraw(mut self) {
        self.ack.take();
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(Err("dropped without acknowledgement".to_string()));
        }
    }
}

pub type EventStream = mpsc::UnboundedReceiver<Delivery>;

// ─── Bus ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Delivery>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Fire-and-forget. Returns how many subscribers received the event.
    pub fn emit(&self, event: EngineEvent) -> usize {
        self.deliver(&event, None)
    }

    /// Emit and wait until one subscriber acknowledges success, every
    /// subscriber has rejected it, or `timeout` elapses.
    pub async fn emit_acknowledged(
        &self,
        event: EngineEvent,
        timeout: Duration,
    ) -> Result<(), EmitError> {
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let delivered = self.deliver(&event, Some(&ack_tx));
        drop(ack_tx);

        if delivered == 0 {
            return Err(EmitError::NoListeners);
        }

        let deadline = Instant::now() + timeout;
        let mut rejections = Vec::new();
        while rejections.len() < delivered {
            match timeout_at(deadline, ack_rx.recv()).await {
                Ok(Some(Ok(()))) => return Ok(()),
                Ok(Some(Err(reason))) => rejections.push(reason),
                Ok(None) => break,
                Err(_) => return Err(EmitError::Timeout(timeout)),
            }
        }
        if rejections.is_empty() {
            // Everyone withdrew.
            return Err(EmitError::NoListeners);
        }
        Err(EmitError::Rejected(rejections.join("; ")))
    }

    fn deliver(&self, event: &EngineEvent, ack: Option<&mpsc::UnboundedSender<AckResult>>) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|tx| {
            let delivery = Delivery {
                event: event.clone(),
                ack: ack.cloned(),
            };
            match tx.send(delivery) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::SendError(mut undelivered)) => {
                    // Closed subscriber: neither a rejection nor a listener.
                    undelivered.ack.take();
                    false
                }
            }
        });
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Delivery>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
