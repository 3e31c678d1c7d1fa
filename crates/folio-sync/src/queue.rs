//! Storage event queue.
//!
//! Single-consumer queue of raw "storage changed" notifications. Only one
//! drain pass runs at a time. A pass pops one notification, waits for the
//! external app to settle, runs change detection and, on the first change,
//! requests exactly one debounced sync and coalesces the rest of its batch.
//! Notifications that arrive during a pass get another pass after a short
//! requeue delay.

use crate::autosave;
use crate::detector::ChangeDetector;
use crate::engine::Shared;
use crate::events::EngineEvent;
use folio_core::Theme;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};

/// Where a notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    /// The platform reported a write by another context.
    Native,
    /// A same-context writer went through the adapter.
    Instrumented,
    /// A polling watcher saw the slot contents change.
    Poll,
    /// Synthetic check issued by `start()`.
    Startup,
}

#[derive(Debug, Clone)]
pub struct StorageNotification {
    pub source: NotificationSource,
    /// The slot that changed, when known.
    pub key: Option<String>,
    pub received: Instant,
}

impl StorageNotification {
    pub fn new(source: NotificationSource) -> Self {
        Self {
            source,
            key: None,
            received: Instant::now(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pending: VecDeque<StorageNotification>,
    draining: bool,
    pass: Option<AbortHandle>,
    /// Bumped by every reset; a pass from an older epoch leaves state alone.
    epoch: u64,
}

impl QueueState {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }
}

/// Enqueue a notification, starting a drain pass if none is running.
pub(crate) fn notify(shared: &Arc<Shared>, notification: StorageNotification) {
    if !shared.autosync_enabled() {
        log::trace!("ignoring {:?} notification while autosync is off", notification.source);
        return;
    }
    let mut queue = shared.queue();
    queue.pending.push_back(notification);
    if !queue.draining {
        queue.draining = true;
        spawn_pass(shared, &mut queue, Duration::ZERO);
    }
}

/// Abort the running pass and drop everything queued.
pub(crate) fn reset(shared: &Shared) {
    let mut queue = shared.queue();
    if let Some(pass) = queue.pass.take() {
        pass.abort();
    }
    let dropped = queue.pending.len();
    queue.pending.clear();
    queue.draining = false;
    queue.epoch += 1;
    if dropped > 0 {
        log::debug!("storage queue reset, {dropped} notifications dropped");
    }
}

// The queue lock is held while spawning, so the new pass cannot observe the
// state before its handle is recorded.
fn spawn_pass(shared: &Arc<Shared>, queue: &mut QueueState, delay: Duration) {
    let epoch = queue.epoch;
    let task_shared = Arc::clone(shared);
    let task = tokio::spawn(async move {
        if !delay.is_zero() {
            sleep(delay).await;
        }
        drain_pass(&task_shared, epoch).await;
    });
    queue.pass = Some(task.abort_handle());
}

async fn drain_pass(shared: &Arc<Shared>, epoch: u64) {
    let batch = shared.queue().pending.len();

    for taken in 1..=batch {
        let Some(notification) = shared.queue().pending.pop_front() else {
            break;
        };
        sleep(shared.config.settle_delay()).await;
        if !shared.autosync_enabled() {
            break;
        }

        let baseline = shared.session().last_sync_data.clone();
        let detection = ChangeDetector::new(&shared.store).inspect(baseline.as_deref());
        if let Some(theme) = detection.theme {
            track_theme(shared, theme);
        }

        if detection.changed {
            log::debug!(
                "storage change after {:?} notification: {:?}",
                notification.source,
                detection.reason
            );
            autosave::request(shared);

            let mut queue = shared.queue();
            let coalesced = (batch - taken).min(queue.pending.len());
            queue.pending.drain(..coalesced);
            break;
        }
    }

    let enabled = shared.autosync_enabled();
    let mut queue = shared.queue();
    if queue.epoch != epoch {
        return;
    }
    queue.pass = None;
    if enabled && !queue.pending.is_empty() {
        let delay = shared.config.requeue_delay();
        spawn_pass(shared, &mut queue, delay);
    } else {
        queue.pending.clear();
        queue.draining = false;
    }
}

fn track_theme(shared: &Shared, theme: Theme) {
    let changed = {
        let mut session = shared.session();
        let changed = session.last_theme != Some(theme);
        session.last_theme = Some(theme);
        changed
    };
    if changed {
        log::info!("theme changed to {theme}");
        shared.bus.emit(EngineEvent::ThemeChanged { theme });
    }
}
