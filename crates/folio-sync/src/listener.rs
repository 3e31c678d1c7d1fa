//! Reference storage-layer listener.
//!
//! Persists every `DocumentSyncRequested` into the document store and
//! acknowledges it, which is what lets autosaves and switch saves succeed.

use crate::documents::DocumentStore;
use crate::error::DocumentStoreError;
use crate::events::{EngineEvent, EventBus};
use folio_core::{DocumentId, Record, ViewState};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Subscribe to `bus` and persist sync requests until the bus goes away or
/// the returned task is aborted.
pub fn spawn_persistence_listener(
    bus: &EventBus,
    documents: Arc<dyn DocumentStore>,
) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(delivery) = events.recv().await {
            let result = match &delivery.event {
                EngineEvent::DocumentSyncRequested {
                    records,
                    view_state,
                    document_id,
                } => persist(&*documents, *document_id, records, view_state),
                _ => Ok(()),
            };
            if let Err(e) = &result {
                log::warn!("could not persist sync request: {e}");
            }
            delivery.acknowledge(result.map_err(|e| e.to_string()));
        }
    })
}

fn persist(
    documents: &dyn DocumentStore,
    id: DocumentId,
    records: &[Record],
    view_state: &ViewState,
) -> Result<(), DocumentStoreError> {
    let mut document = documents.get(id)?.ok_or(DocumentStoreError::NotFound(id))?;
    document.apply_snapshot(records.to_vec(), view_state.clone());
    documents.put(document)?;
    log::debug!("persisted {id} ({} records)", records.len());
    Ok(())
}
