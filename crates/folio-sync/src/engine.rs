//! The engine facade and the state its components share.
//!
//! All components run cooperatively on the tokio runtime. Shared state sits
//! behind short-lived `std::sync::Mutex` guards that are never held across
//! an `.await`; lock order is session → coordinator → queue → switch.

use crate::config::{ConfigError, SyncConfig};
use crate::coordinator::{CoordinatorStats, OperationCoordinator, Validity, ValidityContext};
use crate::documents::{DocumentStore, current_document_id};
use crate::error::SyncError;
use crate::events::{EngineEvent, EventBus, EventStream};
use crate::queue::{self, NotificationSource, QueueState, StorageNotification};
use crate::store::{ExternalStoreAdapter, SlotStorage};
use crate::switch::{self, SwitchOutcome, SwitchPhase, SwitchState};
use folio_core::{Document, DocumentId, OperationId, Theme};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Counters describing what the engine has done since it was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub syncs: u64,
    pub retries: u64,
    pub retry_exhaustions: u64,
    pub integrity_aborts: u64,
    pub abandoned: u64,
    pub switches: u64,
    pub switch_saves: u64,
    pub suspensions: u64,
    pub resumptions: u64,
    pub reloads: u64,
}

/// Mutable engine context.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub running: bool,
    pub active: Option<DocumentId>,
    pub loading: bool,
    /// Cooperative mutual exclusion on the external store: while set, no
    /// autosave or retry may act.
    pub suspended: bool,
    /// Serialized snapshot of the last accepted sync.
    pub last_sync_data: Option<String>,
    pub retry_count: u32,
    pub last_theme: Option<Theme>,
    pub stats: EngineStats,
}

pub(crate) struct Shared {
    pub config: SyncConfig,
    pub store: ExternalStoreAdapter,
    pub documents: Arc<dyn DocumentStore>,
    pub bus: EventBus,
    session: Mutex<Session>,
    coordinator: Mutex<OperationCoordinator>,
    queue: Mutex<QueueState>,
    switch: Mutex<SwitchState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    pub fn coordinator(&self) -> MutexGuard<'_, OperationCoordinator> {
        lock(&self.coordinator)
    }

    pub fn queue(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.queue)
    }

    pub fn switch(&self) -> MutexGuard<'_, SwitchState> {
        lock(&self.switch)
    }

    pub fn is_running(&self) -> bool {
        self.session().running
    }

    /// Running and not suspended by a switch.
    pub fn autosync_enabled(&self) -> bool {
        let session = self.session();
        session.running && !session.suspended
    }

    /// Re-check, right before a visible effect, that `op` may still act.
    pub fn check_operation(&self, op: OperationId, document: DocumentId) -> Result<(), SyncError> {
        let ctx = {
            let session = self.session();
            if !session.running {
                return Err(SyncError::Stopped);
            }
            if session.suspended {
                return Err(SyncError::Coordination(op, Validity::Loading));
            }
            ValidityContext {
                active: session.active,
                loading: session.loading,
                now: Instant::now(),
            }
        };
        match self.coordinator().is_valid(op, document, ctx) {
            Validity::Valid => Ok(()),
            other => Err(SyncError::Coordination(op, other)),
        }
    }

    /// Stop autosave activity ahead of replacing the document.
    pub fn suspend(&self) {
        {
            let mut session = self.session();
            session.suspended = true;
            session.stats.suspensions += 1;
        }
        let cancelled = self.coordinator().cancel_all();
        queue::reset(self);
        log::debug!("autosave suspended ({cancelled} operations cancelled)");
    }

    /// Resume autosave if it is suspended. Returns whether it was.
    pub fn resume(&self) -> bool {
        let mut session = self.session();
        if !session.suspended {
            return false;
        }
        session.suspended = false;
        session.stats.resumptions += 1;
        log::debug!("autosave resumed");
        true
    }
}

// ─── Facade ──────────────────────────────────────────────────────────────

/// Events consumed from the UI collaborator.
#[derive(Debug, Clone)]
pub enum UiEvent {
    DocumentSelected(Document),
    LoadDocumentRequested { document: Document, force_reload: bool },
}

/// Keeps the extension's multi-document model consistent with the external
/// app's single-document store.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<Shared>,
}

impl SyncEngine {
    /// Build a stopped engine with its own event bus. Fails on invalid config.
    pub fn new(
        config: SyncConfig,
        slots: Arc<dyn SlotStorage>,
        documents: Arc<dyn DocumentStore>,
    ) -> Result<Self, ConfigError> {
        Self::with_bus(config, slots, documents, EventBus::new())
    }

    /// Like [`SyncEngine::new`], emitting on an existing bus.
    pub fn with_bus(
        config: SyncConfig,
        slots: Arc<dyn SlotStorage>,
        documents: Arc<dyn DocumentStore>,
        bus: EventBus,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = ExternalStoreAdapter::new(
            slots,
            config.elements_key.clone(),
            config.view_state_key.clone(),
            bus.clone(),
        );
        let coordinator = OperationCoordinator::new(config.staleness());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                store,
                documents,
                bus,
                session: Mutex::new(Session::default()),
                coordinator: Mutex::new(coordinator),
                queue: Mutex::new(QueueState::default()),
                switch: Mutex::new(SwitchState::default()),
            }),
        })
    }

    /// Resolve the active document, seed the baseline and begin listening.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        let shared = &self.shared;
        let active = current_document_id(&*shared.documents)?;
        let document = match active {
            Some(id) => shared.documents.get(id)?,
            None => None,
        };

        // Seed from the live store. An unreadable store leaves no baseline,
        // so the first check reports a change and syncs.
        let live = match shared.store.read() {
            Ok(live) => live,
            Err(e) => {
                log::warn!("could not read the external store at startup: {e}");
                None
            }
        };
        let baseline = match (&active, &live) {
            (Some(_), Some(snapshot)) => Some(snapshot.serialize()?),
            _ => None,
        };
        let theme = live.as_ref().and_then(|s| s.theme());

        {
            let mut session = shared.session();
            session.running = true;
            session.active = active;
            session.loading = false;
            session.suspended = false;
            session.last_sync_data = baseline;
            session.retry_count = 0;
            session.last_theme = theme;
        }
        log::info!("sync engine started, active document: {active:?}");

        if let Some(document) = document {
            let name = document.name.clone();
            shared.bus.emit(EngineEvent::DocumentLoaded { document });
            shared.bus.emit(EngineEvent::FileNameDisplayUpdated { name });
        }
        queue::notify(shared, StorageNotification::new(NotificationSource::Startup));
        Ok(())
    }

    /// Cancel every operation and timer. Safe to call repeatedly.
    pub fn stop(&self) {
        let shared = &self.shared;
        shared.session().running = false;
        let cancelled = shared.coordinator().cancel_all();
        queue::reset(shared);
        switch::reset(shared);
        log::info!("sync engine stopped ({cancelled} operations cancelled)");
    }

    /// Between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// New subscriber to every event emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.shared.bus.subscribe()
    }

    /// The bus events are emitted on.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Adapter over the external app's storage slots.
    pub fn store(&self) -> &ExternalStoreAdapter {
        &self.shared.store
    }

    /// Feed a "something in storage changed" notification.
    pub fn notify_storage_change(&self, source: NotificationSource) {
        queue::notify(&self.shared, StorageNotification::new(source));
    }

    /// Write one slot on behalf of a same-context writer and report it.
    pub fn instrumented_write(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.shared.store.set_slot(key, value)?;
        queue::notify(
            &self.shared,
            StorageNotification::new(NotificationSource::Instrumented).with_key(key),
        );
        Ok(())
    }

    /// Debounced document selection; the most recent selection wins.
    pub fn select_document(&self, document: Document) {
        switch::select(&self.shared, document);
    }

    /// Immediate save → suspend → load, bypassing the selection debounce.
    ///
    /// The switch runs to completion even if the returned future is dropped.
    pub async fn load_document(
        &self,
        document: Document,
        force_reload: bool,
    ) -> Result<SwitchOutcome, SyncError> {
        switch::load_now(&self.shared, document, force_reload).await
    }

    /// Dispatch one event from the UI collaborator.
    pub async fn handle_ui_event(&self, event: UiEvent) -> Result<(), SyncError> {
        match event {
            UiEvent::DocumentSelected(document) => self.select_document(document),
            UiEvent::LoadDocumentRequested {
                document,
                force_reload,
            } => {
                self.load_document(document, force_reload).await?;
            }
        }
        Ok(())
    }

    /// Document currently shown by the external app.
    pub fn active_document(&self) -> Option<DocumentId> {
        self.shared.session().active
    }

    /// Whether a switch has autosave suspended.
    pub fn is_autosave_suspended(&self) -> bool {
        self.shared.session().suspended
    }

    /// Whether a document is being written into the external store.
    pub fn is_loading(&self) -> bool {
        self.shared.session().loading
    }

    /// Serialized snapshot the next change check compares against.
    pub fn last_sync_data(&self) -> Option<String> {
        self.shared.session().last_sync_data.clone()
    }

    /// Consecutive failed syncs of the active document.
    pub fn retry_count(&self) -> u32 {
        self.shared.session().retry_count
    }

    /// Operations currently registered with the coordinator.
    pub fn pending_operations(&self) -> usize {
        self.shared.coordinator().len()
    }

    /// Notifications waiting for a drain pass, and whether one is running.
    pub fn queue_status(&self) -> (usize, bool) {
        let queue = self.shared.queue();
        (queue.len(), queue.is_draining())
    }

    /// Both coordinator indexes agree.
    pub fn registry_is_consistent(&self) -> bool {
        self.shared.coordinator().is_consistent()
    }

    /// Where the switch orchestrator is in its state machine.
    pub fn switch_phase(&self) -> SwitchPhase {
        self.shared.switch().phase()
    }

    /// Engine counters since construction.
    pub fn stats(&self) -> EngineStats {
        self.shared.session().stats
    }

    /// Coordinator counters since construction.
    pub fn coordinator_stats(&self) -> CoordinatorStats {
        self.shared.coordinator().stats()
    }
}
