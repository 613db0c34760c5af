//! Helpers for working with parsed logs.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::LogRecord;

/// Separator used by [`flatten_log`] when comparing logs.
pub const DEFAULT_SEPARATOR: &str = "#";

/// Flatten nested objects, joining key paths with `sep`.
///
/// `{"a": {"b": 1}}` becomes `{"a#b": 1}` with the default separator.
pub fn flatten_log(log: &LogRecord, sep: &str) -> LogRecord {
    let mut out = LogRecord::new();
    flatten_into(log, "", sep, &mut out);
    out
}

fn flatten_into(log: &LogRecord, parent: &str, sep: &str, out: &mut LogRecord) {
    for (key, value) in log {
        let full_key = if parent.is_empty() {
            key.clone()
        } else {
            format!("{parent}{sep}{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(inner, &full_key, sep, out),
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}

/// Keys on which two logs disagree, after flattening.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDiff {
    pub different_values: Vec<String>,
    pub missing_in_first: Vec<String>,
    pub missing_in_second: Vec<String>,
}

impl LogDiff {
    pub fn is_empty(&self) -> bool {
        self.different_values.is_empty()
            && self.missing_in_first.is_empty()
            && self.missing_in_second.is_empty()
    }
}

/// Compare two logs key by key. Each list in the result is sorted.
pub fn compare_logs(first: &LogRecord, second: &LogRecord) -> LogDiff {
    let first = flatten_log(first, DEFAULT_SEPARATOR);
    let second = flatten_log(second, DEFAULT_SEPARATOR);

    let mut diff = LogDiff::default();
    for (key, value) in &first {
        match second.get(key) {
            None => diff.missing_in_second.push(key.clone()),
            Some(other) if other != value => diff.different_values.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in second.keys() {
        if !first.contains_key(key) {
            diff.missing_in_first.push(key.clone());
        }
    }
    diff.different_values.sort();
    diff.missing_in_first.sort();
    diff.missing_in_second.sort();
    diff
}

/// Turn a list of records into one list per key. Records lacking a key
/// contribute `None` at their position, so every list has the same length.
pub fn list_of_maps_to_map_of_lists(logs: &[LogRecord]) -> BTreeMap<String, Vec<Option<Value>>> {
    let mut out: BTreeMap<String, Vec<Option<Value>>> = BTreeMap::new();
    for log in logs {
        for key in log.keys() {
            out.entry(key.clone()).or_default();
        }
    }
    for (key, column) in out.iter_mut() {
        column.extend(logs.iter().map(|log| log.get(key).cloned()));
    }
    out
}
