//! Change detection between the last synced baseline and a fresh read.
//!
//! Two passes:
//!
//! - **Fast path**: serialize the current snapshot and compare it byte for
//!   byte with the baseline string. Identical ⇒ unchanged.
//! - **Slow path**: structural diff that only looks at content-relevant
//!   record fields and at view state minus transient UI fields (selection,
//!   scroll, zoom). Scrolling around a drawing is not an edit.
//!
//! Anything that cannot be decided is reported as a change: a redundant
//! save is cheap, a skipped one loses work.

use crate::model::{ExternalSnapshot, Record, ViewState};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Record fields whose change counts as an edit.
pub const CONTENT_FIELDS: &[&str] = &[
    "type",
    "x",
    "y",
    "width",
    "height",
    "angle",
    "text",
    "originalText",
    "fontSize",
    "fontFamily",
    "textAlign",
    "verticalAlign",
    "strokeColor",
    "backgroundColor",
    "fillStyle",
    "strokeWidth",
    "strokeStyle",
    "roughness",
    "opacity",
    "points",
    "groupIds",
    "frameId",
    "containerId",
    "boundElements",
    "startBinding",
    "endBinding",
    "startArrowhead",
    "endArrowhead",
    "roundness",
    "link",
    "locked",
    "fileId",
    "isDeleted",
    "version",
    "versionNonce",
];

/// View-state fields that change during plain navigation and selection.
pub const TRANSIENT_VIEW_FIELDS: &[&str] = &[
    "selectedElementIds",
    "selectedGroupIds",
    "previousSelectedElementIds",
    "hoveredElementIds",
    "selectedLinearElement",
    "editingElement",
    "editingGroupId",
    "editingLinearElement",
    "selectionElement",
    "draggingElement",
    "resizingElement",
    "cursorButton",
    "scrollX",
    "scrollY",
    "scrolledOutside",
    "zoom",
    "openMenu",
    "openPopup",
    "collaborators",
];

/// Why a snapshot was judged changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeReason {
    /// No baseline exists yet.
    Bootstrap,
    /// The baseline could not be parsed; fail open.
    UnreadableBaseline,
    RecordCount { before: usize, after: usize },
    RecordSet {
        added: SmallVec<[String; 4]>,
        removed: SmallVec<[String; 4]>,
    },
    RecordField { id: String, field: &'static str },
    ViewState { key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeVerdict {
    Unchanged,
    Changed(ChangeReason),
}

impl ChangeVerdict {
    pub fn is_changed(&self) -> bool {
        matches!(self, ChangeVerdict::Changed(_))
    }
}

/// Compare a fresh snapshot against the serialized baseline.
pub fn detect_change(baseline: Option<&str>, current: &ExternalSnapshot) -> ChangeVerdict {
    let Some(baseline) = baseline else {
        return ChangeVerdict::Changed(ChangeReason::Bootstrap);
    };

    if let Ok(serialized) = current.serialize()
        && serialized == baseline
    {
        return ChangeVerdict::Unchanged;
    }

    match ExternalSnapshot::deserialize(baseline) {
        Ok(previous) => diff_snapshots(&previous, current),
        Err(e) => {
            log::debug!("baseline unreadable, treating as changed: {e}");
            ChangeVerdict::Changed(ChangeReason::UnreadableBaseline)
        }
    }
}

/// Structural comparison ignoring non-content fields.
pub fn diff_snapshots(previous: &ExternalSnapshot, current: &ExternalSnapshot) -> ChangeVerdict {
    if let Some(reason) = diff_records(&previous.elements, &current.elements) {
        return ChangeVerdict::Changed(reason);
    }
    if let Some(key) = diff_view_state(&previous.app_state, &current.app_state) {
        return ChangeVerdict::Changed(ChangeReason::ViewState { key });
    }
    ChangeVerdict::Unchanged
}

fn diff_records(previous: &[Record], current: &[Record]) -> Option<ChangeReason> {
    if previous.len() != current.len() {
        return Some(ChangeReason::RecordCount {
            before: previous.len(),
            after: current.len(),
        });
    }

    let before: HashMap<&str, &Record> =
        previous.iter().filter_map(|r| Some((r.id()?, r))).collect();
    let after: HashMap<&str, &Record> =
        current.iter().filter_map(|r| Some((r.id()?, r))).collect();

    let before_ids: HashSet<&str> = before.keys().copied().collect();
    let after_ids: HashSet<&str> = after.keys().copied().collect();
    if before_ids != after_ids {
        let mut added: SmallVec<[String; 4]> =
            after_ids.difference(&before_ids).map(|s| s.to_string()).collect();
        let mut removed: SmallVec<[String; 4]> =
            before_ids.difference(&after_ids).map(|s| s.to_string()).collect();
        added.sort();
        removed.sort();
        return Some(ChangeReason::RecordSet { added, removed });
    }

    // Surviving ids, in current order so the first reported change is stable.
    for record in current {
        let Some(id) = record.id() else { continue };
        let Some(old) = before.get(id) else { continue };
        for &field in CONTENT_FIELDS {
            if old.get(field) != record.get(field) {
                return Some(ChangeReason::RecordField {
                    id: id.to_string(),
                    field,
                });
            }
        }
    }
    None
}

fn persistent_view(state: &ViewState) -> impl Iterator<Item = (&String, &serde_json::Value)> {
    state
        .iter()
        .filter(|(k, _)| !TRANSIENT_VIEW_FIELDS.contains(&k.as_str()))
}

fn diff_view_state(previous: &ViewState, current: &ViewState) -> Option<String> {
    for (key, value) in persistent_view(current) {
        if previous.get(key) != Some(value) {
            return Some(key.clone());
        }
    }
    persistent_view(previous)
        .find(|(key, _)| !current.contains_key(key.as_str()))
        .map(|(key, _)| key.clone())
}
