#![forbid(unsafe_code)]

//! Structural deep clone with a per-node transform hook.

use serde_json::Value;

/// Deep-clone `value`, offering every node to `transform` first.
///
/// When `transform` returns `Some(replacement)`, the replacement is used as
/// is and its subtree is not visited. Otherwise the node is copied and, for
/// composites, each property is cloned recursively. The result never shares
/// mutable state with the input.
pub fn clone_with(value: &Value, transform: &mut dyn FnMut(&Value) -> Option<Value>) -> Value {
    if let Some(replacement) = transform(value) {
        return replacement;
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), clone_with(v, transform)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| clone_with(v, transform)).collect()),
        scalar => scalar.clone(),
    }
}
