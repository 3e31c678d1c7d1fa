//! Folio sync engine.
//!
//! Layers multi-document organization onto an external drawing app that
//! persists a single document in two key-value slots. The engine keeps the
//! app's live state and the document store consistent: it detects edits,
//! autosaves them with debounce and retry, and switches documents without
//! losing or mixing content.

mod autosave;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod documents;
pub mod engine;
pub mod error;
pub mod events;
pub mod listener;
pub mod memory;
pub mod queue;
mod retry;
pub mod store;
pub mod switch;

pub use config::{ConfigError, SyncConfig};
pub use coordinator::{CoordinatorStats, OperationCoordinator, OperationKind, Validity};
pub use detector::{ChangeDetector, Detection};
pub use documents::{CURRENT_DOCUMENT_SETTING, DocumentStore, current_document_id};
pub use engine::{EngineStats, SyncEngine, UiEvent};
pub use error::{DocumentStoreError, EmitError, StoreError, SyncError};
pub use events::{Delivery, EngineEvent, EventBus, EventStream};
pub use listener::spawn_persistence_listener;
pub use queue::{NotificationSource, StorageNotification};
pub use store::{ExternalStoreAdapter, SlotStorage};
pub use switch::{SwitchOutcome, SwitchPhase};
