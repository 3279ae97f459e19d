#![forbid(unsafe_code)]

//! Recursive override of a document onto defaults.

use serde_json::Value;

/// Merge `overrides` onto `defaults`.
///
/// Keys present in both objects are merged recursively; any other override
/// (scalar, array, or an object replacing a non-object) wins outright. Keys
/// only present in `defaults` are kept. Neither input is modified.
#[must_use]
pub fn merge(defaults: &Value, overrides: &Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(base), Value::Object(over)) => {
            let mut out = base.clone();
            for (key, value) in over {
                let merged = match base.get(key) {
                    Some(existing) => merge(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (_, over) => over.clone(),
    }
}
