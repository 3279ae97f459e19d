#![forbid(unsafe_code)]

//! Structural helpers shared by the Canopy observation tree.
//!
//! These are the building blocks the tree calls as black boxes:
//!
//! - [`Composite`]: the object-or-array container shape every wrapped node
//!   stores its fields in.
//! - [`map_properties`]: the property walker; applies a transform to every
//!   property (or element) of a composite and returns the same shape.
//! - [`clone_with`]: structural deep clone with a per-node transform hook.
//! - [`merge`]: recursive override of a configuration document onto defaults.
//! - [`PropertyPath`]: dotted, fully-qualified property names.

pub mod clone;
pub mod composite;
pub mod merge;
pub mod path;

pub use clone::clone_with;
pub use composite::{Composite, MAX_GAP, map_properties};
pub use merge::merge;
pub use path::PropertyPath;

/// Returns `true` for values that can hold nested properties (objects and arrays).
#[inline]
#[must_use]
pub fn is_composite(value: &serde_json::Value) -> bool {
    value.is_object() || value.is_array()
}
