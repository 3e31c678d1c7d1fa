//! Folio host: runs the sync engine against a directory.
//!
//! The directory holds the external app's storage slots (`slots/`, one JSON
//! file per key) and the document library (`documents.msgpack`). Commands
//! are read from stdin; engine events are printed to stdout as JSON lines;
//! logs go to stderr (`RUST_LOG` sets the level).

mod commands;
mod library;
mod slots;
mod watch;

use folio_core::{Document, parse_snapshot};
use folio_sync::{
    CURRENT_DOCUMENT_SETTING, ConfigError, DocumentStore, DocumentStoreError, SlotStorage,
    StoreError, SyncConfig, SyncEngine, SyncError, current_document_id,
    spawn_persistence_listener,
};
use library::Library;
use serde::Deserialize;
use slots::FileSlots;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use watch::WatchMode;

const USAGE: &str = "usage: folio-host [--dir <path>] [--config <file.json>]";

#[derive(Debug, Error)]
enum HostError {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Documents(#[from] DocumentStoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("could not watch the slot directory: {0}")]
    Watch(#[from] notify::Error),
}

/// Host configuration file. Every field is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HostConfig {
    sync: SyncConfig,
    /// How slot file changes are detected: `native` or `poll`.
    watch: WatchMode,
    /// How often slot files are compared in `poll` mode.
    poll_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            watch: WatchMode::default(),
            poll_interval_ms: 250,
        }
    }
}

struct Args {
    dir: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut parsed = Args {
        dir: PathBuf::from(".folio"),
        config: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dir" => parsed.dir = args.next().ok_or("--dir needs a path")?.into(),
            "--config" => parsed.config = Some(args.next().ok_or("--config needs a path")?.into()),
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(parsed)
}

fn load_config(path: Option<&Path>) -> Result<HostConfig, HostError> {
    let Some(path) = path else {
        return Ok(HostConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: HostConfig = serde_json::from_str(&text)
        .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
    if config.poll_interval_ms == 0 {
        return Err(HostError::Config("poll_interval_ms must be greater than zero".into()));
    }
    config.sync.validate()?;
    Ok(config)
}

/// Make sure a current document exists. A first run adopts whatever the
/// external app already shows as an "Untitled" document.
fn bootstrap(library: &Library, slots: &FileSlots, config: &SyncConfig) -> Result<(), HostError> {
    if let Some(id) = current_document_id(library)?
        && library.get(id)?.is_some()
    {
        return Ok(());
    }

    let mut document = Document::new("Untitled");
    if let Some(elements) = slots.get(&config.elements_key)? {
        let state = slots.get(&config.view_state_key)?;
        match parse_snapshot(&elements, state.as_deref()) {
            Ok(snapshot) => document.apply_snapshot(snapshot.elements, snapshot.app_state),
            Err(e) => log::warn!("existing drawing is malformed, starting empty: {e}"),
        }
    }
    log::info!("adopting the current drawing as \"{}\" ({})", document.name, document.id);
    let id = document.id;
    library.put(document)?;
    library.set_setting(CURRENT_DOCUMENT_SETTING, id.as_str())?;
    Ok(())
}

/// Print every event as one JSON line.
fn spawn_event_printer(engine: &SyncEngine) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(delivery) = events.recv().await {
            match serde_json::to_string(&delivery.event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("could not render event: {e}"),
            }
            delivery.withdraw();
        }
    })
}

async fn run(args: Args) -> Result<(), HostError> {
    let config = load_config(args.config.as_deref())?;
    let slots = Arc::new(FileSlots::open(args.dir.join("slots"))?);
    let library = Arc::new(Library::open(args.dir.join("documents.msgpack"))?);
    log::info!("slots in {}", slots.dir().display());

    bootstrap(&library, &slots, &config.sync)?;

    let keys = vec![
        config.sync.elements_key.clone(),
        config.sync.view_state_key.clone(),
    ];
    let engine = SyncEngine::new(config.sync, slots.clone(), library.clone())?;
    let listener = spawn_persistence_listener(engine.bus(), library.clone());
    let printer = spawn_event_printer(&engine);
    engine.start()?;
    let watcher = watch::spawn(
        engine.clone(),
        slots.dir(),
        &keys,
        config.watch,
        Duration::from_millis(config.poll_interval_ms),
    )?;

    eprintln!("{}", commands::HELP);
    let result = commands::repl(&engine, &library).await;

    engine.stop();
    drop(watcher);
    listener.abort();
    printer.abort();
    result.map_err(HostError::from)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("folio-host: {msg}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("folio-host error: {e}");
        std::process::exit(1);
    }
}
