//! Change detector: has the external store moved away from the baseline?

use crate::store::ExternalStoreAdapter;
use folio_core::detect::{ChangeReason, ChangeVerdict, detect_change};
use folio_core::Theme;

/// Result of inspecting the live store.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub changed: bool,
    /// `None` when changed for a reason that is not a content diff (a
    /// failed read) or when unchanged.
    pub reason: Option<ChangeReason>,
    pub theme: Option<Theme>,
}

pub struct ChangeDetector<'a> {
    store: &'a ExternalStoreAdapter,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(store: &'a ExternalStoreAdapter) -> Self {
        Self { store }
    }

    pub fn has_changed(&self, last_serialized: Option<&str>) -> bool {
        self.inspect(last_serialized).changed
    }

    /// An empty store is never a change: syncing emptiness over real data
    /// needs explicit intent. Any failure to read counts as a change.
    pub fn inspect(&self, last_serialized: Option<&str>) -> Detection {
        match self.store.read() {
            Ok(None) => Detection {
                changed: false,
                reason: None,
                theme: None,
            },
            Ok(Some(snapshot)) => {
                let theme = snapshot.theme();
                match detect_change(last_serialized, &snapshot) {
                    ChangeVerdict::Unchanged => Detection {
                        changed: false,
                        reason: None,
                        theme,
                    },
                    ChangeVerdict::Changed(reason) => Detection {
                        changed: true,
                        reason: Some(reason),
                        theme,
                    },
                }
            }
            Err(e) => {
                log::debug!("change detection could not read the store, assuming changed: {e}");
                Detection {
                    changed: true,
                    reason: None,
                    theme: None,
                }
            }
        }
    }
}
