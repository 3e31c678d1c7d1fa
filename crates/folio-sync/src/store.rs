//! External store adapter.
//!
//! The external drawing app persists exactly one document in two key-value
//! slots: a bare array of content records and a flat view-state map. This
//! adapter is the only code that reads or writes those slots. It normalizes
//! what it writes, but never decides *when* to write.

use crate::error::{StoreError, SyncError};
use crate::events::{EngineEvent, EventBus};
use folio_core::normalize::{merge_view_state, normalize_records};
use folio_core::validate::parse_snapshot;
use folio_core::{ExternalSnapshot, ViewState};
use serde_json::{Value, json};
use std::sync::Arc;

/// The external app's key-value storage.
pub trait SlotStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Remove the document-name label from the external app's UI, if shown.
    fn clear_label(&self) {}

    /// Show `name` as the document-name label in the external app's UI.
    fn show_label(&self, _name: &str) {}
}

pub struct ExternalStoreAdapter {
    slots: Arc<dyn SlotStorage>,
    elements_key: String,
    view_state_key: String,
    bus: EventBus,
}

impl ExternalStoreAdapter {
    pub fn new(
        slots: Arc<dyn SlotStorage>,
        elements_key: impl Into<String>,
        view_state_key: impl Into<String>,
        bus: EventBus,
    ) -> Self {
        Self {
            slots,
            elements_key: elements_key.into(),
            view_state_key: view_state_key.into(),
            bus,
        }
    }

    pub fn elements_key(&self) -> &str {
        &self.elements_key
    }

    pub fn view_state_key(&self) -> &str {
        &self.view_state_key
    }

    /// Read both slots. `Ok(None)` when the record slot is empty.
    pub fn read(&self) -> Result<Option<ExternalSnapshot>, SyncError> {
        let elements = self.get_reported(&self.elements_key, "read")?;
        let Some(elements) = elements else {
            return Ok(None);
        };
        let state = self.get_reported(&self.view_state_key, "read")?;
        Ok(Some(parse_snapshot(&elements, state.as_deref())?))
    }

    /// Write a snapshot as one logical unit: records first, then view state.
    ///
    /// Records are normalized, view state is merged onto the existing one
    /// with the active theme preserved. If the view-state write fails, the
    /// previous record slot is restored. Returns the snapshot as written.
    pub fn write(
        &self,
        snapshot: &ExternalSnapshot,
        display_name: &str,
    ) -> Result<ExternalSnapshot, SyncError> {
        let elements = normalize_records(snapshot.elements.clone());
        let existing_state = self.existing_view_state()?;
        let app_state = merge_view_state(existing_state.as_ref(), &snapshot.app_state);

        let previous_elements = self.get_reported(&self.elements_key, "write")?;
        let elements_json = serde_json::to_string(&elements)?;
        let state_json = serde_json::to_string(&app_state)?;

        self.set_reported(&self.elements_key, &elements_json)?;
        if let Err(e) = self.set_reported(&self.view_state_key, &state_json) {
            self.rollback_elements(previous_elements.as_deref());
            return Err(e);
        }

        self.slots.clear_label();
        self.slots.show_label(display_name);
        self.bus.emit(EngineEvent::FileNameDisplayUpdated {
            name: display_name.to_string(),
        });

        Ok(ExternalSnapshot::new(elements, app_state))
    }

    /// Raw single-slot write for writers living in the same context as the
    /// external app. Callers must notify the storage event queue afterwards;
    /// [`SyncEngine::instrumented_write`](crate::SyncEngine::instrumented_write)
    /// does both.
    pub fn set_slot(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.set_reported(key, value)
    }

    /// The view state the merge starts from. A read failure aborts the
    /// write; an unparsable value is replaced.
    fn existing_view_state(&self) -> Result<Option<ViewState>, SyncError> {
        let Some(raw) = self.get_reported(&self.view_state_key, "write")? else {
            return Ok(None);
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            _ => {
                log::warn!("ignoring malformed view state in `{}`", self.view_state_key);
                Ok(None)
            }
        }
    }

    fn rollback_elements(&self, previous: Option<&str>) {
        let restored = match previous {
            Some(value) => self.slots.set(&self.elements_key, value),
            None => self.slots.remove(&self.elements_key),
        };
        if let Err(e) = restored {
            log::error!("could not restore `{}` after failed write: {e}", self.elements_key);
        }
    }

    fn get_reported(&self, key: &str, during: &str) -> Result<Option<String>, SyncError> {
        self.slots.get(key).map_err(|e| self.report(key, during, e))
    }

    fn set_reported(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.slots.set(key, value).map_err(|e| self.report(key, "write", e))
    }

    fn report(&self, key: &str, during: &str, error: StoreError) -> SyncError {
        log::warn!("external store {during} of `{key}` failed: {error}");
        self.bus.emit(EngineEvent::error(
            format!("External storage {during} failed"),
            json!({ "key": key, "error": error.to_string() }),
        ));
        SyncError::Store(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySlots;
    use folio_core::Record;
    use pretty_assertions::assert_eq;

    const ELEMENTS: &str = "excalidraw";
    const STATE: &str = "excalidraw-state";

    fn adapter(slots: &Arc<MemorySlots>) -> (ExternalStoreAdapter, crate::events::EventStream) {
        let bus = EventBus::new();
        let events = bus.subscribe();
        (ExternalStoreAdapter::new(slots.clone(), ELEMENTS, STATE, bus), events)
    }

    fn state(value: Value) -> ViewState {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn empty_store_reads_as_absent() {
        let slots = Arc::new(MemorySlots::new());
        let (adapter, _events) = adapter(&slots);
        assert!(adapter.read().unwrap().is_none());
    }

    #[test]
    fn read_rejects_malformed_records() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, r#"[{"type":"text"}]"#);
        let (adapter, _events) = adapter(&slots);
        assert!(matches!(adapter.read(), Err(SyncError::Integrity(_))));
    }

    #[test]
    fn write_normalizes_and_keeps_theme() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(STATE, r#"{"theme":"dark","gridSize":20}"#);
        let (adapter, mut events) = adapter(&slots);

        let incoming = ExternalSnapshot::new(
            vec![Record::new("r1", "rectangle").with("x", 5)],
            state(json!({ "theme": "light", "viewBackgroundColor": "#fafafa" })),
        );
        let written = adapter.write(&incoming, "Roadmap").unwrap();

        assert_eq!(written.app_state.get("theme"), Some(&json!("dark")));
        assert_eq!(written.app_state.get("gridSize"), Some(&json!(20)));
        assert_eq!(written.elements[0].get("opacity"), Some(&json!(100)));
        assert_eq!(slots.write_order(), vec![ELEMENTS.to_string(), STATE.to_string()]);

        let stored = adapter.read().unwrap().unwrap();
        assert_eq!(stored, written);

        assert_eq!(slots.label(), Some("Roadmap".to_string()));
        assert_eq!(slots.label_ops(), vec!["clear".to_string(), "show:Roadmap".to_string()]);
        let delivery = events.try_recv().unwrap();
        assert_eq!(
            delivery.event,
            EngineEvent::FileNameDisplayUpdated {
                name: "Roadmap".into()
            }
        );
    }

    #[test]
    fn failed_view_state_write_restores_records() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, r#"[{"id":"old","type":"text"}]"#);
        slots.fail_next_writes_to(STATE, 1);
        let (adapter, mut events) = adapter(&slots);

        let incoming = ExternalSnapshot::new(vec![Record::new("new", "text")], ViewState::new());
        assert!(matches!(
            adapter.write(&incoming, "Other"),
            Err(SyncError::Store(_))
        ));

        assert_eq!(slots.slot(ELEMENTS).as_deref(), Some(r#"[{"id":"old","type":"text"}]"#));
        assert_eq!(slots.label(), None);
        let delivery = events.try_recv().unwrap();
        match &delivery.event {
            EngineEvent::ErrorOccurred { details, .. } => assert_eq!(details["key"], json!(STATE)),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn failed_record_write_touches_nothing() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, r#"[{"id":"old","type":"text"}]"#);
        slots.put_raw(STATE, r#"{"theme":"dark"}"#);
        slots.fail_next_writes(1);
        let (adapter, _events) = adapter(&slots);

        let incoming = ExternalSnapshot::new(vec![Record::new("new", "text")], ViewState::new());
        assert!(matches!(
            adapter.write(&incoming, "Other"),
            Err(SyncError::Store(_))
        ));

        assert_eq!(slots.slot(ELEMENTS).as_deref(), Some(r#"[{"id":"old","type":"text"}]"#));
        assert_eq!(slots.slot(STATE).as_deref(), Some(r#"{"theme":"dark"}"#));
        assert!(slots.write_order().is_empty());
        assert_eq!(slots.label(), None);
    }

    #[test]
    fn unreadable_view_state_aborts_write() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, r#"[{"id":"old","type":"text"}]"#);
        slots.put_raw(STATE, r#"{"theme":"dark","gridSize":20}"#);
        slots.fail_next_reads(1);
        let (adapter, mut events) = adapter(&slots);

        let incoming = ExternalSnapshot::new(
            vec![Record::new("new", "text")],
            state(json!({ "theme": "light" })),
        );
        assert!(matches!(
            adapter.write(&incoming, "Other"),
            Err(SyncError::Store(_))
        ));

        assert_eq!(slots.slot(STATE).as_deref(), Some(r#"{"theme":"dark","gridSize":20}"#));
        assert_eq!(slots.slot(ELEMENTS).as_deref(), Some(r#"[{"id":"old","type":"text"}]"#));
        assert!(slots.write_order().is_empty());
        let delivery = events.try_recv().unwrap();
        match &delivery.event {
            EngineEvent::ErrorOccurred { message, details } => {
                assert_eq!(message, "External storage write failed");
                assert_eq!(details["key"], json!(STATE));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn read_failure_is_reported() {
        let slots = Arc::new(MemorySlots::new());
        slots.put_raw(ELEMENTS, "[]");
        slots.fail_next_reads(1);
        let (adapter, mut events) = adapter(&slots);

        assert!(matches!(adapter.read(), Err(SyncError::Store(_))));
        assert!(matches!(
            &events.try_recv().unwrap().event,
            EngineEvent::ErrorOccurred { .. }
        ));
        assert!(adapter.read().unwrap().is_some());
    }
}
