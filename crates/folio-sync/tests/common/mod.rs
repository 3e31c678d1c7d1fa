//! Shared harness: an engine over in-memory collaborators with three
//! documents (Alpha active and loaded, Beta, Gamma), the persistence
//! listener, and an event recorder.

#![allow(dead_code)]

use folio_core::{Document, DocumentId};
use folio_sync::memory::{MemoryDocumentStore, MemorySlots};
use folio_sync::{
    CURRENT_DOCUMENT_SETTING, DocumentStore, EngineEvent, EventBus, NotificationSource,
    SyncConfig, SyncEngine, spawn_persistence_listener,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const ELEMENTS: &str = "excalidraw";
pub const STATE: &str = "excalidraw-state";

pub fn alpha() -> DocumentId {
    DocumentId::intern("doc-alpha")
}

pub fn beta() -> DocumentId {
    DocumentId::intern("doc-beta")
}

pub fn gamma() -> DocumentId {
    DocumentId::intern("doc-gamma")
}

fn document(id: DocumentId, name: &str, records: Value) -> Document {
    let mut doc = Document::with_id(id, name);
    doc.elements = serde_json::from_value(records).unwrap();
    doc.app_state = serde_json::from_value(json!({
        "theme": "light",
        "viewBackgroundColor": "#ffffff",
        "zoom": { "value": 1 },
    }))
    .unwrap();
    doc
}

/// Config tuned for tests: defaults, but the host is never asked to reload.
pub fn config() -> SyncConfig {
    SyncConfig {
        force_reload: false,
        ..SyncConfig::default()
    }
}

// ─── Recorder ────────────────────────────────────────────────────────────

/// Records every event without taking part in acknowledgement.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        let mut stream = bus.subscribe();
        tokio::spawn(async move {
            while let Some(delivery) = stream.recv().await {
                events.lock().unwrap().push(delivery.event.clone());
                delivery.withdraw();
            }
        });
        recorder
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::ErrorOccurred { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn loaded(&self) -> Vec<DocumentId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::DocumentLoaded { document } => Some(document.id),
                _ => None,
            })
            .collect()
    }

    pub fn sync_requests(&self, id: DocumentId) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(e, EngineEvent::DocumentSyncRequested { document_id, .. } if *document_id == id)
            })
            .count()
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────

pub struct Harness {
    pub engine: SyncEngine,
    pub slots: Arc<MemorySlots>,
    pub documents: Arc<MemoryDocumentStore>,
    pub recorder: Recorder,
    pub listener: Option<JoinHandle<()>>,
}

impl Harness {
    /// Started engine with the persistence listener attached.
    pub fn start(config: SyncConfig) -> Self {
        Self::build(config, true)
    }

    /// Started engine with nobody acknowledging sync requests.
    pub fn start_without_listener(config: SyncConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: SyncConfig, with_listener: bool) -> Self {
        let alpha_doc = document(
            alpha(),
            "Alpha",
            json!([
                { "id": "a-title", "type": "text", "text": "Alpha", "x": 0, "y": 0 },
                { "id": "a-box", "type": "rectangle", "x": 10, "y": 10, "width": 100, "height": 50 },
            ]),
        );
        let beta_doc = document(
            beta(),
            "Beta",
            json!([{ "id": "b-note", "type": "text", "text": "Beta" }]),
        );
        let gamma_doc = document(
            gamma(),
            "Gamma",
            json!([{ "id": "c-arrow", "type": "arrow", "x": 5 }]),
        );

        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, &serde_json::to_string(&alpha_doc.elements).unwrap());
        slots.put_raw(STATE, &serde_json::to_string(&alpha_doc.app_state).unwrap());

        let documents = Arc::new(MemoryDocumentStore::with_documents([
            alpha_doc, beta_doc, gamma_doc,
        ]));
        documents
            .set_setting(CURRENT_DOCUMENT_SETTING, alpha().as_str())
            .unwrap();

        let engine = SyncEngine::new(config, slots.clone(), documents.clone()).unwrap();
        let listener =
            with_listener.then(|| spawn_persistence_listener(engine.bus(), documents.clone()));
        let recorder = Recorder::attach(engine.bus());
        engine.start().unwrap();

        Self {
            engine,
            slots,
            documents,
            recorder,
            listener,
        }
    }

    pub fn document(&self, id: DocumentId) -> Document {
        self.documents.get(id).unwrap().unwrap()
    }

    /// Record ids currently in the external store.
    pub fn slot_ids(&self) -> Vec<String> {
        let records: Vec<Value> =
            serde_json::from_str(&self.slots.slot(ELEMENTS).unwrap()).unwrap();
        records
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }

    /// Edit a text record the way the external app would, then notify.
    pub fn edit_text(&self, id: &str, text: &str) {
        let mut records: Vec<Value> =
            serde_json::from_str(&self.slots.slot(ELEMENTS).unwrap()).unwrap();
        for record in &mut records {
            if record["id"] == id {
                record["text"] = json!(text);
            }
        }
        self.slots
            .put_raw(ELEMENTS, &serde_json::to_string(&records).unwrap());
        self.engine
            .notify_storage_change(NotificationSource::Native);
    }

    pub fn persisted_text(&self, doc: DocumentId, record: &str) -> Option<String> {
        self.document(doc)
            .elements
            .iter()
            .find(|r| r.id() == Some(record))
            .and_then(|r| r.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn current_setting(&self) -> Option<String> {
        self.documents
            .get_setting(CURRENT_DOCUMENT_SETTING)
            .unwrap()
    }
}

/// Advance virtual time, letting every timer due in the window fire.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
