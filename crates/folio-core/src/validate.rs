//! Integrity checks for data read out of the external store.
//!
//! Malformed data is never synced: a record list that is not a list, a
//! record without an `id`/`type`, or a view-state that is not a map aborts
//! the sync cycle before anything is emitted.

use crate::model::{ExternalSnapshot, Record, ViewState};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("record slot is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("record slot holds {0}, expected an array")]
    NotASequence(&'static str),

    #[error("record #{index} is not an object")]
    RecordNotObject { index: usize },

    #[error("record #{index} has no string `id`")]
    MissingId { index: usize },

    #[error("record {id} has no string `type`")]
    MissingType { id: String },

    #[error("view state holds {0}, expected an object")]
    ViewStateNotMap(&'static str),
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate the record slot and turn it into typed records.
pub fn validate_records(value: Value) -> Result<Vec<Record>, IntegrityError> {
    let items = match value {
        Value::Array(items) => items,
        other => return Err(IntegrityError::NotASequence(describe(&other))),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(fields) = item else {
                return Err(IntegrityError::RecordNotObject { index });
            };
            let record = Record(fields);
            let id = match record.id() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => return Err(IntegrityError::MissingId { index }),
            };
            if record.kind().is_none() {
                return Err(IntegrityError::MissingType { id });
            }
            Ok(record)
        })
        .collect()
}

/// Validate the view-state slot. An absent slot is treated as an empty map.
pub fn validate_view_state(value: Option<Value>) -> Result<ViewState, IntegrityError> {
    match value {
        None => Ok(ViewState::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(IntegrityError::ViewStateNotMap(describe(&other))),
    }
}

/// Parse and validate both raw slot strings into a snapshot.
pub fn parse_snapshot(
    elements: &str,
    app_state: Option<&str>,
) -> Result<ExternalSnapshot, IntegrityError> {
    let elements: Value = serde_json::from_str(elements)
        .map_err(|e| IntegrityError::MalformedJson(e.to_string()))?;
    let app_state = app_state
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| IntegrityError::MalformedJson(e.to_string()))?;

    Ok(ExternalSnapshot::new(
        validate_records(elements)?,
        validate_view_state(app_state)?,
    ))
}
