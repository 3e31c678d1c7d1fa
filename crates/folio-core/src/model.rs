//! Document data model.
//!
//! A document is an ordered list of opaque content records plus a flat
//! view-state map. The engine never interprets record contents beyond the
//! handful of fields it needs for identity, normalization and change
//! detection. Everything else is carried through untouched.

use crate::id::{DocumentId, now_millis};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Flat key → value map describing how the external app displays a document.
pub type ViewState = Map<String, Value>;

/// View-state key holding the display theme.
pub const THEME_KEY: &str = "theme";

// ─── Records ─────────────────────────────────────────────────────────────

/// One opaque content record (a shape, a text block, an arrow, ...).
///
/// Only `id` and `type` are structurally required; all other fields are
/// preserved verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new(id: &str, kind: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.into()));
        fields.insert("type".into(), Value::String(kind.into()));
        Self(fields)
    }

    /// Stable record id, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Record type (`rectangle`, `text`, ...), if present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Builder-style setter, handy for fixtures.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────

/// What the external app currently holds in its two storage slots.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSnapshot {
    pub elements: Vec<Record>,
    pub app_state: ViewState,
}

impl ExternalSnapshot {
    pub fn new(elements: Vec<Record>, app_state: ViewState) -> Self {
        Self {
            elements,
            app_state,
        }
    }

    /// Canonical serialized form used as the change-detection baseline.
    ///
    /// `serde_json::Map` keeps keys sorted, so equal snapshots always
    /// serialize to identical strings.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(serialized: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(serialized)
    }

    pub fn theme(&self) -> Option<Theme> {
        Theme::from_view_state(&self.app_state)
    }
}

// ─── Theme ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn from_view_state(state: &ViewState) -> Option<Self> {
        match state.get(THEME_KEY).and_then(Value::as_str) {
            Some("light") => Some(Theme::Light),
            Some("dark") => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Document ────────────────────────────────────────────────────────────

/// The organizational unit: a named drawing owned by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub elements: Vec<Record>,
    #[serde(default)]
    pub app_state: ViewState,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Document {
    /// Create an empty document with a freshly generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(DocumentId::generate(), name)
    }

    pub fn with_id(id: DocumentId, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id,
            name: name.into(),
            project_id: None,
            elements: Vec::new(),
            app_state: ViewState::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The content this document puts into the external store when loaded.
    pub fn snapshot(&self) -> ExternalSnapshot {
        ExternalSnapshot::new(self.elements.clone(), self.app_state.clone())
    }

    /// Replace content with a synced snapshot and bump `updated_at`.
    pub fn apply_snapshot(&mut self, elements: Vec<Record>, app_state: ViewState) {
        self.elements = elements;
        self.app_state = app_state;
        self.updated_at = now_millis().max(self.updated_at);
    }
}
