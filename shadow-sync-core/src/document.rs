use serde_json::{Map, Value};

use crate::error::SyncError;

/// Top-level fields stripped before an "is this shadow unchanged" compare.
/// `cloudUpdateTime` is informational and never participates in ordering
/// decisions (spec §4.4.6), so it is stripped alongside `version`/
/// `timestamp`/`metadata`.
const IGNORED_TOP_LEVEL_FIELDS: &[&str] = &["version", "timestamp", "metadata"];

/// Reads the numeric `version` field of a shadow document.
pub fn version_of(doc: &Value) -> Option<u64> {
    doc.get("version").and_then(Value::as_u64)
}

/// Returns a copy of `doc` with its `version` field set to `version`.
pub fn with_version(mut doc: Value, version: u64) -> Value {
    if let Value::Object(map) = &mut doc {
        map.insert("version".to_string(), Value::from(version));
    }
    doc
}

/// Parses a shadow document from bytes, mapping malformed JSON to
/// [`SyncError::Skip`] (a permanent logical failure per spec §7).
pub fn parse(bytes: &[u8]) -> Result<Value, SyncError> {
    serde_json::from_slice(bytes).map_err(SyncError::from)
}

pub fn to_bytes(doc: &Value) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(doc).map_err(SyncError::from)
}

/// Canonicalizes a document for comparison: strips the ignored top-level
/// fields and recursively sorts object keys (serde_json's default `Map` is
/// already key-sorted since we don't enable the `preserve_order` feature,
/// but we strip first so canonicalization is explicit and obviously
/// correct regardless of that feature flag).
fn canonicalize_for_compare(doc: &Value) -> Value {
    match doc {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if IGNORED_TOP_LEVEL_FIELDS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k.clone(), canonicalize_value(v));
            }
            Value::Object(out)
        }
        other => canonicalize_value(other),
    }
}

fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), canonicalize_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

/// Returns true when two documents are equal ignoring `version`,
/// `timestamp` and `metadata` (spec §4.4.6).
pub fn unchanged(a: &Value, b: &Value) -> bool {
    canonicalize_for_compare(a) == canonicalize_for_compare(b)
}

/// Applies `patch` onto `base` with "null-leaf deletion" semantics: a
/// `null` value at a given path removes that key from the result; any
/// other value replaces the base value at that path. Recurses into nested
/// objects so only genuinely overlapping leaves are touched; non-object
/// patch values (including whole new subtrees) simply replace the base
/// value wholesale.
pub fn merge_null_deletes(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut out = base_map.clone();
            for (k, v) in patch_map {
                if v.is_null() {
                    out.remove(k);
                } else if let Some(existing) = out.get(k) {
                    let merged = merge_null_deletes(existing, v);
                    out.insert(k.clone(), merged);
                } else {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        (_, patch) => patch.clone(),
    }
}

/// Computes a patch document describing how `updated` differs from `base`:
/// changed or added leaves appear with their new value, removed leaves
/// appear as `null`. Applying the result to `base` via
/// [`merge_null_deletes`] reproduces `updated` (ignoring the fields
/// [`unchanged`] strips, since callers diff already-stripped or
/// free-standing subtrees such as `state.reported`/`state.desired`).
pub fn diff(base: &Value, updated: &Value) -> Value {
    match (base, updated) {
        (Value::Object(base_map), Value::Object(updated_map)) => {
            let mut out = Map::new();
            for (k, v) in updated_map {
                match base_map.get(k) {
                    Some(existing) if existing == v => {}
                    Some(existing) if existing.is_object() && v.is_object() => {
                        let nested = diff(existing, v);
                        if let Value::Object(nested_map) = &nested {
                            if !nested_map.is_empty() {
                                out.insert(k.clone(), nested);
                            }
                        }
                    }
                    _ => {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            for k in base_map.keys() {
                if !updated_map.contains_key(k) {
                    out.insert(k.clone(), Value::Null);
                }
            }
            Value::Object(out)
        }
        (a, b) if a == b => Value::Object(Map::new()),
        (_, b) => b.clone(),
    }
}

/// Empty shadow document skeleton: `{"version":0,"state":{"reported":{},"desired":{}},"metadata":{}}`.
pub fn empty_document() -> Value {
    serde_json::json!({
        "version": 0,
        "state": { "reported": {}, "desired": {} },
        "metadata": {},
    })
}
