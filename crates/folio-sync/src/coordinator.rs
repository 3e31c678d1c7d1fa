//! Per-document registry of in-flight operations.
//!
//! Every deferred action the engine takes (a load, a debounced autosave, a
//! retry) is registered here first. The registry is keyed by document, so a
//! document never has more than one scheduled action: registering a new one
//! cancels the old one. A reverse index maps operation ids back to their
//! document for cross-referencing.
//!
//! Deferred callbacks must call [`OperationCoordinator::is_valid`] right
//! before producing any visible effect. Time passes between scheduling and
//! execution, and the active document may have changed in between.

use folio_core::{DocumentId, OperationId};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Load,
    Autosave,
    /// Re-execution of a failed sync; `attempt` is 1-based.
    Retry { attempt: u32, parent: OperationId },
}

/// One in-flight action on one document.
#[derive(Debug)]
pub struct PendingOperation {
    pub id: OperationId,
    pub document: DocumentId,
    pub kind: OperationKind,
    pub created: Instant,
    /// Timer or task driving this operation; aborted on cancellation.
    handle: Option<AbortHandle>,
}

impl PendingOperation {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Engine context an operation is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ValidityContext {
    pub active: Option<DocumentId>,
    pub loading: bool,
    pub now: Instant,
}

/// Outcome of a validity check. Anything but `Valid` means "do nothing".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// Not registered any more: completed, cancelled or superseded.
    Unknown,
    ContextChanged,
    Loading,
    Stale,
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Validity::Valid => "valid",
            Validity::Unknown => "superseded or cancelled",
            Validity::ContextChanged => "active document changed",
            Validity::Loading => "a document load is in progress",
            Validity::Stale => "operation is stale",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub registered: u64,
    pub cancelled: u64,
    pub completed: u64,
    pub evicted: u64,
}

pub struct OperationCoordinator {
    by_document: HashMap<DocumentId, PendingOperation>,
    by_operation: HashMap<OperationId, DocumentId>,
    staleness: Duration,
    stats: CoordinatorStats,
}

impl OperationCoordinator {
    /// Empty registry; operations older than `staleness` are never valid.
    pub fn new(staleness: Duration) -> Self {
        Self {
            by_document: HashMap::new(),
            by_operation: HashMap::new(),
            staleness,
            stats: CoordinatorStats::default(),
        }
    }

    /// Register a new operation for `document`, cancelling any previous one.
    pub fn register(&mut self, document: DocumentId, kind: OperationKind) -> OperationId {
        self.evict_stale(Instant::now());
        self.cancel(document);

        let id = OperationId::generate();
        self.by_operation.insert(id, document);
        self.by_document.insert(
            document,
            PendingOperation {
                id,
                document,
                kind,
                created: Instant::now(),
                handle: None,
            },
        );
        self.stats.registered += 1;
        log::trace!("registered {id} ({kind:?}) for {document}");
        id
    }

    /// Attach the task driving `id`. If the operation is already gone the
    /// handle is aborted immediately and `false` is returned.
    pub fn attach_handle(&mut self, id: OperationId, handle: AbortHandle) -> bool {
        let document = self.by_operation.get(&id).copied();
        let op = document
            .and_then(|doc| self.by_document.get_mut(&doc))
            .filter(|op| op.id == id);
        match op {
            Some(op) => {
                if let Some(previous) = op.handle.replace(handle) {
                    previous.abort();
                }
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Cancel the operation scheduled for `document`, if any.
    pub fn cancel(&mut self, document: DocumentId) -> bool {
        match self.remove(document) {
            Some(op) => {
                log::debug!("cancelled {} ({:?}) for {}", op.id, op.kind, document);
                op.cancel();
                self.stats.cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Cancel everything. Returns the number of operations cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.by_document.len();
        for (_, op) in self.by_document.drain() {
            op.cancel();
        }
        self.by_operation.clear();
        self.stats.cancelled += count as u64;
        count
    }

    /// Remove `id` after it finished (successfully or not) without aborting
    /// its task. No-op if it was already superseded.
    pub fn complete(&mut self, id: OperationId) -> bool {
        let Some(&document) = self.by_operation.get(&id) else {
            return false;
        };
        if self.by_document.get(&document).is_some_and(|op| op.id == id) {
            self.remove(document);
            self.stats.completed += 1;
            true
        } else {
            false
        }
    }

    /// Drop and cancel every operation older than the staleness bound.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let stale: Vec<DocumentId> = self
            .by_document
            .values()
            .filter(|op| op.age(now) > self.staleness)
            .map(|op| op.document)
            .collect();
        for document in &stale {
            if let Some(op) = self.remove(*document) {
                log::debug!("evicted stale {} for {}", op.id, document);
                op.cancel();
            }
        }
        self.stats.evicted += stale.len() as u64;
        stale.len()
    }

    /// May `id`, targeting `document`, produce a visible effect right now?
    pub fn is_valid(&self, id: OperationId, document: DocumentId, ctx: ValidityContext) -> Validity {
        let Some(op) = self.by_document.get(&document).filter(|op| op.id == id) else {
            return Validity::Unknown;
        };
        if ctx.active != Some(document) {
            return Validity::ContextChanged;
        }
        if ctx.loading {
            return Validity::Loading;
        }
        if op.age(ctx.now) > self.staleness {
            return Validity::Stale;
        }
        Validity::Valid
    }

    /// The operation scheduled for `document`.
    pub fn get(&self, document: DocumentId) -> Option<&PendingOperation> {
        self.by_document.get(&document)
    }

    /// Document targeted by a registered operation.
    pub fn document_of(&self, id: OperationId) -> Option<DocumentId> {
        self.by_operation.get(&id).copied()
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.by_document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_document.is_empty()
    }

    /// Lifetime counters of the registry.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Both indexes agree: no orphaned entry in either direction.
    pub fn is_consistent(&self) -> bool {
        self.by_document.len() == self.by_operation.len()
            && self
                .by_document
                .iter()
                .all(|(doc, op)| op.document == *doc && self.by_operation.get(&op.id) == Some(doc))
    }

    fn remove(&mut self, document: DocumentId) -> Option<PendingOperation> {
        let op = self.by_document.remove(&document)?;
        self.by_operation.remove(&op.id);
        Some(op)
    }
}
