//! Document library persisted as one MessagePack file.

use folio_core::{Document, DocumentId};
use folio_sync::{DocumentStore, DocumentStoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Contents {
    documents: Vec<Document>,
    settings: BTreeMap<String, String>,
}

pub struct Library {
    path: PathBuf,
    contents: Mutex<Contents>,
}

impl Library {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DocumentStoreError> {
        let path = path.into();
        let contents = match fs::read(&path) {
            Ok(bytes) => rmp_serde::from_slice(&bytes)
                .map_err(|e| DocumentStoreError::Backend(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Contents::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            contents: Mutex::new(contents),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Contents> {
        self.contents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy, persist it, then publish it. A failed save
    /// leaves memory as it was.
    fn update(&self, change: impl FnOnce(&mut Contents)) -> Result<(), DocumentStoreError> {
        let mut contents = self.lock();
        let mut next = contents.clone();
        change(&mut next);
        self.save(&next)?;
        *contents = next;
        Ok(())
    }

    fn save(&self, contents: &Contents) -> Result<(), DocumentStoreError> {
        let bytes = rmp_serde::to_vec_named(contents)
            .map_err(|e| DocumentStoreError::Backend(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("msgpack.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DocumentStore for Library {
    fn get(&self, id: DocumentId) -> Result<Option<Document>, DocumentStoreError> {
        Ok(self.lock().documents.iter().find(|d| d.id == id).cloned())
    }

    fn put(&self, document: Document) -> Result<(), DocumentStoreError> {
        self.update(|contents| {
            match contents.documents.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => contents.documents.push(document),
            }
        })
    }

    fn list(&self) -> Result<Vec<Document>, DocumentStoreError> {
        let mut documents = self.lock().documents.clone();
        documents.sort_by_key(|d| d.created_at);
        Ok(documents)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, DocumentStoreError> {
        Ok(self.lock().settings.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), DocumentStoreError> {
        self.update(|contents| {
            contents.settings.insert(key.to_string(), value.to_string());
        })
    }
}
