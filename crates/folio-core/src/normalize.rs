//! Write-side normalization.
//!
//! The external app crashes or silently drops records that lack fields it
//! assumes are present, so every record is completed with defaults before it
//! is written. View state is merged with what is already in the store: the
//! user's active theme always survives a document load.

use crate::id::now_millis;
use crate::model::{Record, THEME_KEY, ViewState};
use rand::Rng;
use serde_json::{Value, json};

/// Field defaults applied to every record that lacks them.
fn common_defaults() -> [(&'static str, Value); 17] {
    [
        ("x", json!(0)),
        ("y", json!(0)),
        ("width", json!(0)),
        ("height", json!(0)),
        ("angle", json!(0)),
        ("strokeColor", json!("#1e1e1e")),
        ("backgroundColor", json!("transparent")),
        ("fillStyle", json!("solid")),
        ("strokeWidth", json!(1)),
        ("strokeStyle", json!("solid")),
        ("roughness", json!(1)),
        ("opacity", json!(100)),
        ("groupIds", json!([])),
        ("frameId", Value::Null),
        ("boundElements", Value::Null),
        ("isDeleted", json!(false)),
        ("locked", json!(false)),
    ]
}

/// Extra defaults for text records.
fn text_defaults() -> [(&'static str, Value); 5] {
    [
        ("text", json!("")),
        ("fontSize", json!(20)),
        ("fontFamily", json!(1)),
        ("textAlign", json!("left")),
        ("verticalAlign", json!("top")),
    ]
}

fn random_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn fill(record: &mut Record, field: &str, value: Value) {
    if record.get(field).is_none_or(Value::is_null) {
        record.set(field, value);
    }
}

/// Complete a single record with defaults.
///
/// Returns `None` for records with no `type`: there is no sensible default
/// shape to give them.
pub fn normalize_record(mut record: Record) -> Option<Record> {
    let kind = record.kind()?.to_string();

    if record.id().is_none_or(str::is_empty) {
        record.set("id", random_id());
    }

    for (field, value) in common_defaults() {
        fill(&mut record, field, value);
    }
    if kind == "text" {
        for (field, value) in text_defaults() {
            fill(&mut record, field, value);
        }
    }

    let mut rng = rand::thread_rng();
    for seed_field in ["seed", "versionNonce"] {
        if !record.get(seed_field).is_some_and(Value::is_u64) {
            record.set(seed_field, rng.gen_range(1..i32::MAX as u64));
        }
    }
    if !record.get("version").is_some_and(Value::is_u64) {
        record.set("version", 1);
    }
    if record.get("updated").is_none() {
        record.set("updated", now_millis());
    }

    Some(record)
}

/// Normalize a full record list, dropping untyped records.
pub fn normalize_records(records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id().map(str::to_string);
            let normalized = normalize_record(record);
            if normalized.is_none() {
                log::warn!("dropping record {:?} with no type", id);
            }
            normalized
        })
        .collect()
}

/// Merge an incoming view state onto the one already in the store.
///
/// Pre-existing fields the incoming state does not supply are preserved;
/// supplied fields win, except `theme`, where the existing value wins.
pub fn merge_view_state(existing: Option<&ViewState>, incoming: &ViewState) -> ViewState {
    let mut merged = existing.cloned().unwrap_or_default();
    let active_theme = merged.get(THEME_KEY).cloned();

    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }

    if let Some(theme) = active_theme {
        merged.insert(THEME_KEY.to_string(), theme);
    }
    merged
}
