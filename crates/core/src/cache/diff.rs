//! Structural diff over dynamic-data maps.
//!
//! Pure functions only: no I/O, no shared state, safe to call from any
//! number of concurrent callers without synchronization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-confirmed dynamic fields of a page, field name → value.
pub type DynamicData = BTreeMap<String, String>;

/// Diff output, field name → change.
pub type DiffData = BTreeMap<String, FieldChange>;

/// One field's change between two confirmed versions of dynamic data.
///
/// Removed keys get an explicit tombstone so a renderer can distinguish
/// "unchanged" (absent from the diff) from "removed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", content = "value", rename_all = "lowercase")]
pub enum FieldChange {
    /// The field was added or its value changed.
    Set(String),
    /// The field existed previously and is absent from the new data.
    Removed,
}

/// Compute the structural diff between two dynamic-data maps.
///
/// The output contains every key of `current` whose value differs from
/// `previous` (keys absent from `previous` count as changed), plus a
/// [`FieldChange::Removed`] tombstone for every key of `previous` missing
/// from `current`. Equal inputs yield an empty map.
pub fn diff(previous: &DynamicData, current: &DynamicData) -> DiffData {
    let mut out = DiffData::new();

    for (key, value) in current {
        if previous.get(key) != Some(value) {
            out.insert(key.clone(), FieldChange::Set(value.clone()));
        }
    }

    for key in previous.keys() {
        if !current.contains_key(key) {
            out.insert(key.clone(), FieldChange::Removed);
        }
    }

    out
}
