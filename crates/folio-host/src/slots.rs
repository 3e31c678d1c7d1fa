//! Storage slots as files: `<dir>/<key>.json`, one per slot.

use folio_sync::{SlotStorage, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub struct FileSlots {
    dir: PathBuf,
    label: Mutex<Option<String>>,
}

impl FileSlots {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            label: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn label(&self) -> Option<String> {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StoreError::Unavailable(format!("invalid slot key `{key}`")));
        }
        Ok(self.dir.join(slot_file_name(key)))
    }
}

/// File name backing slot `key`.
pub fn slot_file_name(key: &str) -> String {
    format!("{key}.json")
}

impl SlotStorage for FileSlots {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path(key)?;
        // Write-then-rename so a concurrent reader never sees half a slot.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_label(&self) {
        self.label
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn show_label(&self, name: &str) {
        log::info!("now showing \"{name}\"");
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = Some(name.to_string());
    }
}
