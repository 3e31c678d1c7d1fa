//! Switch orchestrator.
//!
//! `Idle → PendingSwitch → Saving → Loading → Idle`
//!
//! Selections are debounced and the most recent one wins. A switch saves the
//! outgoing document with an acknowledged sync, suspends autosave, writes the
//! latest pending target into the external store and finally resumes
//! autosave. On the reload path the orchestration state is torn down and
//! re-created after a grace delay instead of being resumed in place. Every
//! attempt, failed or not, ends with autosave resumed.
//!
//! Attempts run on their own task: a caller that stops waiting does not
//! stop the attempt, and its cleanup still runs.

use crate::coordinator::OperationKind;
use crate::documents::{CURRENT_DOCUMENT_SETTING, current_document_id};
use crate::engine::Shared;
use crate::error::SyncError;
use crate::events::EngineEvent;
use crate::queue;
use folio_core::{Document, DocumentId};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SwitchPhase {
    #[default]
    Idle,
    /// Debouncing a selection.
    PendingSwitch,
    /// Saving the outgoing document.
    Saving,
    /// Autosave suspended, target being written.
    Loading,
}

/// What a switch attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Loaded { document: DocumentId, reload: bool },
    /// The target was already the active document; nothing was written.
    AlreadyActive(DocumentId),
    /// The pending target was consumed before the attempt reached it.
    NothingPending,
    /// Another switch is running; the request will run after it.
    Deferred,
}

#[derive(Debug, Clone)]
struct PendingTarget {
    document: Document,
    /// Per-request override of `SyncConfig::force_reload`.
    force_reload: Option<bool>,
}

#[derive(Debug, Default)]
pub(crate) struct SwitchState {
    phase: SwitchPhase,
    pending: Option<PendingTarget>,
    debounce: Option<AbortHandle>,
    reload: Option<AbortHandle>,
    in_progress: bool,
}

impl SwitchState {
    pub fn phase(&self) -> SwitchPhase {
        self.phase
    }
}

// ─── Entry points ────────────────────────────────────────────────────────

/// Record `document` as the latest selection and (re)start the debounce.
pub(crate) fn select(shared: &Arc<Shared>, document: Document) {
    if !shared.is_running() {
        log::debug!("ignoring selection of {}, engine stopped", document.id);
        return;
    }
    log::debug!("selected {}", document.id);
    let mut state = shared.switch();
    state.pending = Some(PendingTarget {
        document,
        force_reload: None,
    });
    if !state.in_progress {
        state.phase = SwitchPhase::PendingSwitch;
    }
    arm_debounce(shared, &mut state);
}

/// Run a switch to `document` now, without the selection debounce.
pub(crate) async fn load_now(
    shared: &Arc<Shared>,
    document: Document,
    force_reload: bool,
) -> Result<SwitchOutcome, SyncError> {
    if !shared.is_running() {
        return Err(SyncError::Stopped);
    }
    {
        let mut state = shared.switch();
        state.pending = Some(PendingTarget {
            document,
            force_reload: Some(force_reload),
        });
        if state.in_progress {
            return Ok(SwitchOutcome::Deferred);
        }
        if let Some(debounce) = state.debounce.take() {
            debounce.abort();
        }
        state.in_progress = true;
    }
    attempt(shared).await
}

/// Drop pending work and timers. A switch already executing finishes on
/// its own and observes the stopped engine.
pub(crate) fn reset(shared: &Shared) {
    let mut state = shared.switch();
    if let Some(debounce) = state.debounce.take() {
        debounce.abort();
    }
    if let Some(reload) = state.reload.take() {
        reload.abort();
        state.in_progress = false;
    }
    state.pending = None;
    if !state.in_progress {
        state.phase = SwitchPhase::Idle;
    }
}

// ─── Execution ───────────────────────────────────────────────────────────

fn arm_debounce(shared: &Arc<Shared>, state: &mut SwitchState) {
    if let Some(previous) = state.debounce.take() {
        previous.abort();
    }
    let delay = shared.config.switch_debounce();
    let task_shared = Arc::clone(shared);
    let task = tokio::spawn(async move {
        sleep(delay).await;
        on_debounce(&task_shared).await;
    });
    state.debounce = Some(task.abort_handle());
}

async fn on_debounce(shared: &Arc<Shared>) {
    let start = {
        let mut state = shared.switch();
        // This task now runs the switch; a later selection must not abort it.
        state.debounce = None;
        if state.in_progress {
            // Re-armed when the running switch finishes.
            false
        } else if state.pending.is_none() {
            state.phase = SwitchPhase::Idle;
            false
        } else {
            state.in_progress = true;
            true
        }
    };
    if start && let Ok(outcome) = attempt(shared).await {
        log::debug!("switch finished: {outcome:?}");
    }
}

/// Spawn one attempt and wait for it. The caller has set `in_progress`.
async fn attempt(shared: &Arc<Shared>) -> Result<SwitchOutcome, SyncError> {
    let task_shared = Arc::clone(shared);
    match tokio::spawn(async move { run(&task_shared).await }).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("document switch task died: {e}");
            finish(shared);
            Err(SyncError::Interrupted)
        }
    }
}

/// Run one attempt and its cleanup.
async fn run(shared: &Arc<Shared>) -> Result<SwitchOutcome, SyncError> {
    let result = execute(shared).await;
    shared.session().loading = false;

    if let Err(e) = &result {
        log::warn!("document switch failed: {e}");
        shared.bus.emit(EngineEvent::error(
            "Failed to switch document",
            json!({ "error": e.to_string() }),
        ));
    }

    match &result {
        Ok(SwitchOutcome::Loaded {
            document,
            reload: true,
        }) => schedule_reload(shared, *document),
        _ => finish(shared),
    }
    result
}

async fn execute(shared: &Arc<Shared>) -> Result<SwitchOutcome, SyncError> {
    if !shared.is_running() {
        return Err(SyncError::Stopped);
    }
    shared.switch().phase = SwitchPhase::Saving;

    let current = resolve_current(shared);
    if let Some(current) = current {
        save_outgoing(shared, current).await;
    }

    shared.suspend();

    // A newer selection may have landed while the save was in flight.
    let Some(target) = shared.switch().pending.take() else {
        return Ok(SwitchOutcome::NothingPending);
    };
    let id = target.document.id;
    if current == Some(id) {
        log::debug!("{id} is already active, nothing to load");
        return Ok(SwitchOutcome::AlreadyActive(id));
    }

    shared.switch().phase = SwitchPhase::Loading;
    let reload = target.force_reload.unwrap_or(shared.config.force_reload);
    load_target(shared, target.document)?;
    Ok(SwitchOutcome::Loaded {
        document: id,
        reload,
    })
}

/// The document on display. The persisted setting lags behind the engine
/// when remembering an earlier load failed; the engine wins and the setting
/// is repaired.
fn resolve_current(shared: &Shared) -> Option<DocumentId> {
    let active = shared.session().active;
    match current_document_id(&*shared.documents) {
        Ok(persisted) if persisted == active => {}
        Ok(persisted) => {
            log::warn!("settings name {persisted:?} as current but {active:?} is shown");
            if let Some(active) = active
                && let Err(e) = shared
                    .documents
                    .set_setting(CURRENT_DOCUMENT_SETTING, active.as_str())
            {
                log::warn!("could not repair the current document setting: {e}");
            }
        }
        Err(e) => log::warn!("could not read the current document setting, using {active:?}: {e}"),
    }
    active
}

/// Acknowledged save of the outgoing document. Failures are reported and
/// the switch proceeds.
async fn save_outgoing(shared: &Shared, current: DocumentId) {
    // The save below supersedes any autosave still waiting.
    shared.coordinator().cancel(current);

    let snapshot = match shared.store.read() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            log::debug!("external store is empty, nothing to save for {current}");
            return;
        }
        Err(e) => {
            report_save_failure(shared, current, &e);
            return;
        }
    };

    shared.session().stats.switch_saves += 1;
    let event = EngineEvent::DocumentSyncRequested {
        records: snapshot.elements,
        view_state: snapshot.app_state,
        document_id: current,
    };
    match shared
        .bus
        .emit_acknowledged(event, shared.config.ack_timeout())
        .await
    {
        Ok(()) => log::info!("saved {current} before switching"),
        Err(e) => report_save_failure(shared, current, &SyncError::Emit(e)),
    }
}

fn report_save_failure(shared: &Shared, document: DocumentId, error: &SyncError) {
    log::warn!("could not save {document} before switching: {error}");
    shared.bus.emit(EngineEvent::error(
        "Failed to save current document before switching",
        json!({ "documentId": document, "error": error.to_string() }),
    ));
}

fn load_target(shared: &Shared, document: Document) -> Result<(), SyncError> {
    shared.session().loading = true;
    let op = shared.coordinator().register(document.id, OperationKind::Load);
    if !shared.is_running() {
        shared.coordinator().complete(op);
        return Err(SyncError::Stopped);
    }

    let written = shared.store.write(&document.snapshot(), &document.name);
    shared.coordinator().complete(op);
    let written = written?;
    let baseline = written.serialize()?;

    {
        let mut session = shared.session();
        session.active = Some(document.id);
        session.last_sync_data = Some(baseline);
        session.retry_count = 0;
        session.last_theme = written.theme().or(session.last_theme);
        session.stats.switches += 1;
    }

    if let Err(e) = shared
        .documents
        .set_setting(CURRENT_DOCUMENT_SETTING, document.id.as_str())
    {
        log::warn!("could not persist {} as the current document: {e}", document.id);
        shared.bus.emit(EngineEvent::error(
            "Failed to remember the current document",
            json!({ "documentId": document.id, "error": e.to_string() }),
        ));
    }

    log::info!("loaded {} ({})", document.name, document.id);
    shared.bus.emit(EngineEvent::DocumentLoaded { document });
    Ok(())
}

// ─── Completion ──────────────────────────────────────────────────────────

fn finish(shared: &Arc<Shared>) {
    shared.resume();
    let running = shared.is_running();
    let mut state = shared.switch();
    state.in_progress = false;
    if !running {
        state.pending = None;
        state.phase = SwitchPhase::Idle;
    } else if state.pending.is_some() {
        state.phase = SwitchPhase::PendingSwitch;
        arm_debounce(shared, &mut state);
    } else {
        state.phase = SwitchPhase::Idle;
    }
}

fn schedule_reload(shared: &Arc<Shared>, document: DocumentId) {
    shared.session().stats.reloads += 1;
    let grace = shared.config.reload_grace();
    let task_shared = Arc::clone(shared);
    let mut state = shared.switch();
    let task = tokio::spawn(async move {
        sleep(grace).await;
        reinit(&task_shared, document);
    });
    state.reload = Some(task.abort_handle());
}

/// Tear down and re-create the orchestration state after a reload request.
fn reinit(shared: &Arc<Shared>, document: DocumentId) {
    shared.bus.emit(EngineEvent::ReloadRequested {
        document_id: document,
    });
    let cancelled = shared.coordinator().cancel_all();
    queue::reset(shared);
    shared.switch().reload = None;
    log::info!("orchestration reset after loading {document} ({cancelled} operations dropped)");
    finish(shared);
}
