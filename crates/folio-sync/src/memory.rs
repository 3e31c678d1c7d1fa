//! In-memory collaborators.
//!
//! Used by embedders that keep everything in process and by test harnesses,
//! which can inject read/write failures.

use crate::documents::DocumentStore;
use crate::error::{DocumentStoreError, StoreError};
use crate::store::SlotStorage;
use folio_core::{Document, DocumentId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one unit of an injected failure budget.
fn take_fault(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ─── Slots ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemorySlots {
    values: Mutex<HashMap<String, String>>,
    read_faults: AtomicU32,
    write_faults: Mutex<HashMap<Option<String>, u32>>,
    writes: Mutex<Vec<String>>,
    label: Mutex<Option<String>>,
    label_ops: Mutex<Vec<String>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a slot directly, the way the external app itself would.
    pub fn put_raw(&self, key: &str, value: &str) {
        lock(&self.values).insert(key.to_string(), value.to_string());
    }

    /// Current slot value, bypassing injected faults.
    pub fn slot(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.read_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.write_faults).insert(None, count);
    }

    pub fn fail_next_writes_to(&self, key: &str, count: u32) {
        lock(&self.write_faults).insert(Some(key.to_string()), count);
    }

    /// Keys of successful `set` calls, in order.
    pub fn write_order(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self, key: &str) -> usize {
        lock(&self.writes).iter().filter(|k| *k == key).count()
    }

    pub fn label(&self) -> Option<String> {
        lock(&self.label).clone()
    }

    /// `clear` / `show:<name>` in call order.
    pub fn label_ops(&self) -> Vec<String> {
        lock(&self.label_ops).clone()
    }

    fn take_write_fault(&self, key: &str) -> bool {
        let mut faults = lock(&self.write_faults);
        for slot in [Some(key.to_string()), None] {
            if let Some(remaining) = faults.get_mut(&slot)
                && *remaining > 0
            {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

impl SlotStorage for MemorySlots {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if take_fault(&self.read_faults) {
            return Err(StoreError::Unavailable(format!("injected read failure on `{key}`")));
        }
        Ok(self.slot(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.take_write_fault(key) {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
            });
        }
        self.put_raw(key, value);
        lock(&self.writes).push(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn clear_label(&self) {
        lock(&self.label_ops).push("clear".to_string());
        lock(&self.label).take();
    }

    fn show_label(&self, name: &str) {
        lock(&self.label_ops).push(format!("show:{name}"));
        *lock(&self.label) = Some(name.to_string());
    }
}

// ─── Documents ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<DocumentId, Document>>,
    settings: Mutex<HashMap<String, String>>,
    put_faults: AtomicU32,
    setting_faults: AtomicU32,
    setting_read_faults: AtomicU32,
    puts: Mutex<Vec<DocumentId>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        lock(&store.documents).extend(documents.into_iter().map(|d| (d.id, d)));
        store
    }

    pub fn fail_next_puts(&self, count: u32) {
        self.put_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_setting_writes(&self, count: u32) {
        self.setting_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_setting_reads(&self, count: u32) {
        self.setting_read_faults.store(count, Ordering::SeqCst);
    }

    /// How many times `id` was written through `put`.
    pub fn put_count(&self, id: DocumentId) -> usize {
        lock(&self.puts).iter().filter(|p| **p == id).count()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, id: DocumentId) -> Result<Option<Document>, DocumentStoreError> {
        Ok(lock(&self.documents).get(&id).cloned())
    }

    fn put(&self, document: Document) -> Result<(), DocumentStoreError> {
        if take_fault(&self.put_faults) {
            return Err(DocumentStoreError::Backend("injected put failure".into()));
        }
        lock(&self.puts).push(document.id);
        lock(&self.documents).insert(document.id, document);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Document>, DocumentStoreError> {
        let mut documents: Vec<Document> = lock(&self.documents).values().cloned().collect();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, DocumentStoreError> {
        if take_fault(&self.setting_read_faults) {
            return Err(DocumentStoreError::Backend("injected settings read failure".into()));
        }
        Ok(lock(&self.settings).get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), DocumentStoreError> {
        if take_fault(&self.setting_faults) {
            return Err(DocumentStoreError::Backend("injected settings failure".into()));
        }
        lock(&self.settings).insert(key.to_string(), value.to_string());
        Ok(())
    }
}
