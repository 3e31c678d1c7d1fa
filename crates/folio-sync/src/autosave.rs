//! Debounced autosave scheduler.
//!
//! A change signal (re)schedules one `Autosave` operation for the active
//! document after a quiet window. When it fires, the operation re-validates,
//! re-reads the store and emits an acknowledged sync request. The baseline
//! only moves once a listener has accepted the data.

use crate::coordinator::OperationKind;
use crate::engine::Shared;
use crate::error::SyncError;
use crate::events::EngineEvent;
use crate::retry;
use folio_core::{DocumentId, OperationId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Schedule a debounced autosave for the active document, replacing any
/// autosave or retry already scheduled for it.
pub(crate) fn request(shared: &Arc<Shared>) -> Option<OperationId> {
    let document = {
        let session = shared.session();
        if !session.running || session.suspended {
            return None;
        }
        session.active
    };
    let Some(document) = document else {
        log::debug!("change detected with no active document, nothing to save");
        return None;
    };
    Some(schedule(
        shared,
        document,
        OperationKind::Autosave,
        shared.config.autosave_debounce(),
    ))
}

/// Register an operation and run a sync cycle for it after `delay`.
pub(crate) fn schedule(
    shared: &Arc<Shared>,
    document: DocumentId,
    kind: OperationKind,
    delay: Duration,
) -> OperationId {
    let op = shared.coordinator().register(document, kind);
    let task_shared = Arc::clone(shared);
    let task = tokio::spawn(async move {
        sleep(delay).await;
        run_cycle(&task_shared, op, document).await;
    });
    shared.coordinator().attach_handle(op, task.abort_handle());
    log::trace!("{op} scheduled in {delay:?}");
    op
}

async fn run_cycle(shared: &Arc<Shared>, op: OperationId, document: DocumentId) {
    match sync_once(shared, op, document).await {
        Ok(Some(serialized)) => {
            {
                let mut session = shared.session();
                if session.active == Some(document) && !session.suspended {
                    session.last_sync_data = Some(serialized);
                }
                session.retry_count = 0;
                session.stats.syncs += 1;
            }
            shared.coordinator().complete(op);
            log::info!("synced {document}");
        }
        Ok(None) => {
            shared.coordinator().complete(op);
            log::debug!("{op}: external store is empty, nothing to sync");
        }
        Err(SyncError::Coordination(_, validity)) => {
            shared.coordinator().complete(op);
            shared.session().stats.abandoned += 1;
            log::debug!("{op} for {document} abandoned: {validity}");
        }
        Err(SyncError::Stopped) => {
            shared.coordinator().complete(op);
            log::debug!("{op} for {document} dropped, engine stopped");
        }
        Err(SyncError::Integrity(e)) => {
            shared.coordinator().complete(op);
            shared.session().stats.integrity_aborts += 1;
            log::warn!("sync of {document} aborted, external data is malformed: {e}");
        }
        Err(e) if e.is_transient() => retry::on_failure(shared, op, document, e),
        Err(e) => {
            shared.coordinator().complete(op);
            log::error!("sync of {document} failed and will not be retried: {e}");
        }
    }
}

/// One attempt. `Ok(None)` when the store is empty.
async fn sync_once(
    shared: &Shared,
    op: OperationId,
    document: DocumentId,
) -> Result<Option<String>, SyncError> {
    shared.check_operation(op, document)?;
    let Some(snapshot) = shared.store.read()? else {
        return Ok(None);
    };
    let serialized = snapshot.serialize()?;

    shared.check_operation(op, document)?;
    let event = EngineEvent::DocumentSyncRequested {
        records: snapshot.elements,
        view_state: snapshot.app_state,
        document_id: document,
    };
    shared
        .bus
        .emit_acknowledged(event, shared.config.ack_timeout())
        .await?;
    Ok(Some(serialized))
}
