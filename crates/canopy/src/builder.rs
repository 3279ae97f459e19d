#![forbid(unsafe_code)]

//! Recursive wrapping of plain values into nodes.
//!
//! Children are built first and only linked to their parent once the parent
//! node exists, so no partially built subtree is ever reachable from a
//! notification.

use canopy_core::{is_composite, map_properties};
use serde_json::Value;

use crate::node::{Field, Observed};
use crate::registry::Scope;
use crate::settings::{Options, Settings};

/// Wrap `value` as a new root.
///
/// Objects and arrays become [`Field::Node`]; scalars (including `null`)
/// come back unchanged as [`Field::Value`].
pub fn wrap(value: Value, options: Options) -> Field {
    let settings = options.apply(&Settings::default());
    let scope = options.scope.unwrap_or_default();
    match build(value, settings, &scope) {
        Ok(node) => Field::Node(node),
        Err(scalar) => Field::Value(scalar),
    }
}

/// Prepare a value written into a node with `holder` settings.
///
/// Composites are wrapped with the holder's child settings, or stored plain
/// when the holder is at its depth limit. Existing nodes are adopted as they
/// are, unless `clone_on_wrap` asks for a detached copy.
pub(crate) fn wrap_field(value: Field, holder: &Settings) -> Field {
    let child_settings = holder.for_children();
    match value {
        Field::Node(node) => match child_settings {
            Some(settings) if holder.clone_on_wrap => {
                wrap_child(node.snapshot(), Some(&settings), &mut Vec::new())
            }
            Some(_) => Field::Node(node),
            None => Field::Value(node.snapshot()),
        },
        Field::Value(value) => wrap_child(value, child_settings.as_ref(), &mut Vec::new()),
    }
}

/// Build a node from a composite, or return a scalar untouched.
fn build(value: Value, settings: Settings, scope: &Scope) -> Result<Observed, Value> {
    let child_settings = settings.for_children();
    let mut children = Vec::new();
    let target = map_properties(value, |v| wrap_child(v, child_settings.as_ref(), &mut children))?;
    let node = Observed::from_parts(target, settings, scope.registry());
    for child in &children {
        child.set_parent(&node);
    }
    Ok(node)
}

fn wrap_child(value: Value, settings: Option<&Settings>, built: &mut Vec<Observed>) -> Field {
    match settings {
        Some(settings) if is_composite(&value) => {
            match build(value, settings.clone(), &Scope::TreeLocal) {
                Ok(node) => {
                    built.push(node.clone());
                    Field::Node(node)
                }
                Err(value) => Field::Value(value),
            }
        }
        _ => Field::Value(value),
    }
}
