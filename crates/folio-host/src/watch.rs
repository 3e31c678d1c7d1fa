//! Slot file watcher: the external app writes slot files on its own, so the
//! host watches the slot directory and reports changes to the engine.
//!
//! `native` uses the platform's file notifications. `poll` compares file
//! contents on an interval, for file systems that deliver no notifications.

use crate::slots::slot_file_name;
use folio_sync::{NotificationSource, SyncEngine};
use notify::{Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    #[default]
    Native,
    Poll,
}

impl WatchMode {
    fn source(self) -> NotificationSource {
        match self {
            WatchMode::Native => NotificationSource::Native,
            WatchMode::Poll => NotificationSource::Poll,
        }
    }
}

/// Running watcher. Dropping it stops the notifications.
pub struct SlotWatcher {
    _watcher: Box<dyn Watcher + Send>,
    forwarder: JoinHandle<()>,
}

impl Drop for SlotWatcher {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Watch `dir` for changes to the slot files of `keys`.
pub fn spawn(
    engine: SyncEngine,
    dir: &Path,
    keys: &[String],
    mode: WatchMode,
    poll_every: Duration,
) -> notify::Result<SlotWatcher> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = watch_dir(dir, mode, poll_every, tx)?;
    let names: HashSet<OsString> = keys.iter().map(|k| slot_file_name(k).into()).collect();
    let source = mode.source();

    let forwarder = tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            match result {
                Ok(event) if touches_slot(&event, &names) => {
                    if !engine.is_running() {
                        break;
                    }
                    log::trace!("slot files changed: {:?}", event.paths);
                    engine.notify_storage_change(source);
                }
                Ok(_) => {}
                Err(e) => log::warn!("slot watcher error: {e}"),
            }
        }
        log::debug!("slot watcher stopped");
    });

    log::info!("watching {} ({mode:?})", dir.display());
    Ok(SlotWatcher {
        _watcher: watcher,
        forwarder,
    })
}

fn watch_dir(
    dir: &Path,
    mode: WatchMode,
    poll_every: Duration,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> notify::Result<Box<dyn Watcher + Send>> {
    let handler = move |result: notify::Result<Event>| {
        let _ = tx.send(result);
    };
    let mut watcher: Box<dyn Watcher + Send> = match mode {
        WatchMode::Native => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
        WatchMode::Poll => Box::new(PollWatcher::new(
            handler,
            notify::Config::default()
                .with_poll_interval(poll_every)
                .with_compare_contents(true),
        )?),
    };
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Whether `event` changed one of the watched slot files. Temp files from
/// write-then-rename and plain reads do not count.
fn touches_slot(event: &Event, names: &HashSet<OsString>) -> bool {
    if event.kind.is_access() {
        return false;
    }
    event
        .paths
        .iter()
        .filter_map(|path| path.file_name())
        .any(|name| names.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventKind;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RenameMode};
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn names() -> HashSet<OsString> {
        ["excalidraw", "excalidraw-state"]
            .iter()
            .map(|k| slot_file_name(k).into())
            .collect()
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from("/slots").join(path))
    }

    #[test]
    fn only_slot_changes_count() {
        let names = names();
        assert!(touches_slot(
            &event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "excalidraw.json"),
            &names
        ));
        assert!(touches_slot(
            &event(EventKind::Create(CreateKind::File), "excalidraw-state.json"),
            &names
        ));
        assert!(!touches_slot(
            &event(EventKind::Create(CreateKind::File), "excalidraw.json.tmp"),
            &names
        ));
        assert!(!touches_slot(
            &event(EventKind::Access(AccessKind::Read), "excalidraw.json"),
            &names
        ));
        assert!(!touches_slot(
            &event(EventKind::Create(CreateKind::File), "notes.json"),
            &names
        ));
    }

    #[test]
    fn watch_mode_reads_from_config() {
        let mode: WatchMode = serde_json::from_str(r#""poll""#).unwrap();
        assert_eq!(mode, WatchMode::Poll);
        assert_eq!(WatchMode::default().source(), NotificationSource::Native);
    }

    #[tokio::test]
    async fn poll_watcher_sees_a_written_slot() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher =
            watch_dir(dir.path(), WatchMode::Poll, Duration::from_millis(20), tx).unwrap();

        std::fs::write(dir.path().join("excalidraw.json"), "[]").unwrap();

        let names = names();
        let seen = timeout(Duration::from_secs(5), async {
            while let Some(result) = rx.recv().await {
                if let Ok(event) = result
                    && touches_slot(&event, &names)
                {
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(seen, Ok(true));
    }
}
