//! Helpers for working with [`EventData`]: dot-notation flattening, merging for attach/modify
//! consequences, and query string serialization.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::event::EventData;

/// Suffix on an attach/modify key that applies a map to every element of the matching array.
const WILDCARD_SUFFIX: &str = "[*]";

/// Flatten nested maps into dot-separated keys. Only leaves are kept; arrays are leaves.
///
/// ```
/// # use launch_rules::event_data::flatten;
/// let data = serde_json::json!({"a": {"b": 1}, "c": [1, 2]});
/// let flat = flatten(data.as_object().unwrap());
/// assert_eq!(flat.get("a.b"), Some(&serde_json::json!(1)));
/// assert_eq!(flat.get("a"), None);
/// ```
pub fn flatten(data: &EventData) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    flatten_into(&mut flat, None, data);
    flat
}

fn flatten_into(flat: &mut BTreeMap<String, Value>, prefix: Option<&str>, data: &EventData) {
    for (key, value) in data {
        let key = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(flat, Some(&key), inner),
            leaf => {
                flat.insert(key, leaf.clone());
            }
        }
    }
}

/// String form of a value as substituted into templates.
///
/// Strings are used verbatim, `null` becomes an empty string, and compound values are rendered as
/// compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Percent-encode everything except unreserved characters (`A-Z a-z 0-9 - _ . ~`).
pub fn url_encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Serialize flattened data as `key=value` pairs joined with `&`.
///
/// Array values are joined with `,` before encoding. `null` values are skipped.
pub fn to_query_string(flat: &BTreeMap<String, Value>) -> String {
    flat.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Array(items) => items
                    .iter()
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                other => value_to_string(other),
            };
            if key.is_empty() {
                return None;
            }
            Some(format!("{}={}", url_encode(key), url_encode(&value)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Merge `from` into `to`, returning the merged map.
///
/// Nested maps merge recursively. Without `overwrite`, existing keys keep their value and arrays
/// are unioned; with `overwrite`, incoming values replace existing ones and `null` deletes the
/// key. A key ending in `[*]` merges its map into each map element of the array under the key
/// without the suffix.
pub fn merge(from: &EventData, to: &EventData, overwrite: bool) -> EventData {
    let mut merged = to.clone();
    for (key, incoming) in from {
        if let Some(list_key) = key.strip_suffix(WILDCARD_SUFFIX) {
            merge_into_each(&mut merged, list_key, incoming, overwrite);
            continue;
        }
        match merge_slot(merged.get(key), incoming, overwrite) {
            Slot::Keep => {}
            Slot::Remove => {
                merged.remove(key);
            }
            Slot::Set(value) => {
                merged.insert(key.clone(), value);
            }
        }
    }
    merged
}

enum Slot {
    Keep,
    Remove,
    Set(Value),
}

fn merge_slot(existing: Option<&Value>, incoming: &Value, overwrite: bool) -> Slot {
    match (existing, incoming) {
        (Some(Value::Object(to)), Value::Object(from)) => {
            Slot::Set(Value::Object(merge(from, to, overwrite)))
        }
        (Some(Value::Array(to)), Value::Array(from)) if !overwrite => {
            let mut union = to.clone();
            for item in from {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            Slot::Set(Value::Array(union))
        }
        (Some(_), Value::Null) if overwrite => Slot::Remove,
        (Some(_), value) if overwrite => Slot::Set(value.clone()),
        (Some(_), _) => Slot::Keep,
        (None, Value::Null) if overwrite => Slot::Keep,
        (None, value) => Slot::Set(value.clone()),
    }
}

fn merge_into_each(merged: &mut EventData, list_key: &str, incoming: &Value, overwrite: bool) {
    let Value::Object(template) = incoming else {
        log::debug!(target: "launch_rules", key = list_key; "wildcard value is not a map, skipping");
        return;
    };
    let Some(Value::Array(items)) = merged.get_mut(list_key) else {
        return;
    };
    for item in items.iter_mut() {
        if let Value::Object(element) = item {
            *element = merge(template, element, overwrite);
        }
    }
}
