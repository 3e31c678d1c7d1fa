//! Retry manager for failed syncs.

use crate::autosave;
use crate::coordinator::OperationKind;
use crate::engine::Shared;
use crate::error::SyncError;
use crate::events::EngineEvent;
use folio_core::{DocumentId, OperationId};
use serde_json::json;
use std::sync::Arc;

enum Next {
    Abandon,
    Retry(u32),
    Exhausted,
}

/// Handle a transient sync failure of `failed`.
///
/// Retries with exponential backoff while the failing document is still the
/// active one. Past `max_retries` the counter resets and a terminal error is
/// emitted; the engine stays usable for the next change.
pub(crate) fn on_failure(
    shared: &Arc<Shared>,
    failed: OperationId,
    document: DocumentId,
    error: SyncError,
) {
    let current = shared.coordinator().complete(failed);
    let max = shared.config.max_retries;

    let next = {
        let mut session = shared.session();
        if !current || !session.running || session.suspended || session.active != Some(document) {
            session.stats.abandoned += 1;
            Next::Abandon
        } else if session.retry_count >= max {
            session.retry_count = 0;
            session.stats.retry_exhaustions += 1;
            Next::Exhausted
        } else {
            session.retry_count += 1;
            session.stats.retries += 1;
            Next::Retry(session.retry_count)
        }
    };

    match next {
        Next::Abandon => {
            log::debug!("sync of {document} failed out of context, not retrying: {error}");
        }
        Next::Retry(attempt) => {
            let delay = shared.config.retry_delay(attempt);
            log::warn!("sync of {document} failed (retry {attempt}/{max} in {delay:?}): {error}");
            autosave::schedule(
                shared,
                document,
                OperationKind::Retry {
                    attempt,
                    parent: failed,
                },
                delay,
            );
        }
        Next::Exhausted => {
            log::error!("sync of {document} failed after {max} retries: {error}");
            shared.bus.emit(EngineEvent::error(
                "Failed to save document after multiple attempts",
                json!({
                    "documentId": document,
                    "attempts": max,
                    "error": error.to_string(),
                }),
            ));
        }
    }
}
