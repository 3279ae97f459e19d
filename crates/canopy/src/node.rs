#![forbid(unsafe_code)]

//! The reactive facade over one composite value.
//!
//! # Design
//!
//! An [`Observed`] is a cheap, cloneable handle to a node stored in
//! `Rc<RefCell<..>>`. The node owns its target (the object or array holding
//! its fields), its settings, and its subscription registry. Composite
//! fields are themselves `Observed` nodes whose `parent` is a `Weak` link
//! back to the holder, so the tree never forms a reference cycle and a
//! detached subtree is reclaimed as soon as the last handle drops.
//!
//! All access goes through the facade: [`get`](Observed::get) and
//! [`has`](Observed::has) forward to the target, [`set`](Observed::set)
//! wraps the value, stores it, and hands the write to the propagator.
//!
//! # Failure Modes
//!
//! - Writing a reserved control name fails with
//!   [`TreeError::ReservedName`] and leaves the target unchanged.
//! - Storing a node inside itself or inside one of its descendants fails
//!   with [`TreeError::CycleDetected`]. Since a stored node is first taken
//!   out of its previous holder, every node has at most one holder and the
//!   parent chain is the whole story.
//! - Array writes that would pad too far past the end fail with
//!   [`TreeError::InvalidKey`] and store nothing.
//! - A callback error is returned from `set` after the write completed.
//!
//! No borrow is held while callbacks run, so callbacks may read and write
//! the tree freely.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use canopy_core::composite::parse_index;
use canopy_core::{Composite, PropertyPath, clone_with};
use serde_json::Value;
use tracing::debug;

use crate::broadcast::{BroadcastEvent, Listener, ListenerId, Listeners, deliver};
use crate::builder;
use crate::error::{CallbackError, TreeError};
use crate::propagate::{self, ChangeEvent};
use crate::registry::{IntoPatterns, Registry, SubscriptionId};
use crate::settings::{Options, Settings};

/// Names that belong to the control surface and can never be data keys.
pub const RESERVED_NAMES: &[&str] = &[
    "is_observed",
    "watcher",
    "snapshot",
    "unwrap",
    "reconfigure",
    "settings",
    "subscribe",
    "unsubscribe",
    "add_listener",
    "remove_listener",
    "dispatch",
];

/// Array bookkeeping field; writes to it never notify.
pub const LENGTH: &str = "length";

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// A field of a node: a plain value or a wrapped child.
#[derive(Debug, Clone)]
pub enum Field {
    Value(Value),
    Node(Observed),
}

impl Field {
    /// `true` for wrapped nodes, `false` for plain values.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Node(_) => None,
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&Observed> {
        match self {
            Self::Node(n) => Some(n),
            Self::Value(_) => None,
        }
    }

    #[must_use]
    pub fn into_node(self) -> Option<Observed> {
        match self {
            Self::Node(n) => Some(n),
            Self::Value(_) => None,
        }
    }

    /// Plain deep copy; wrapped nodes are snapshotted.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Node(n) => n.snapshot(),
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Observed> for Field {
    fn from(node: Observed) -> Self {
        Self::Node(node)
    }
}

pub(crate) struct NodeInner {
    pub(crate) target: Composite<Field>,
    pub(crate) parent: Weak<RefCell<NodeInner>>,
    pub(crate) settings: Settings,
    pub(crate) registry: Rc<RefCell<Registry>>,
    pub(crate) listeners: Listeners,
}

/// Handle to a wrapped node.
///
/// Cloning shares the node.
#[derive(Clone)]
pub struct Observed {
    inner: Rc<RefCell<NodeInner>>,
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Observed")
                .field("array", &inner.target.is_array())
                .field("len", &inner.target.len())
                .field("root", &(inner.parent.strong_count() == 0))
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("Observed").finish_non_exhaustive(),
        }
    }
}

impl Observed {
    pub(crate) fn from_parts(
        target: Composite<Field>,
        settings: Settings,
        registry: Rc<RefCell<Registry>>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(NodeInner {
                target,
                parent: Weak::new(),
                settings,
                registry,
                listeners: Listeners::default(),
            })),
        }
    }

    /// Wrap a composite value as a new root.
    ///
    /// Fails with [`TreeError::NotComposite`] for scalars; use
    /// [`crate::wrap`] to pass scalars through unchanged instead.
    pub fn from_value(value: Value, options: Options) -> Result<Self, TreeError> {
        builder::wrap(value, options)
            .into_node()
            .ok_or(TreeError::NotComposite)
    }

    /// Whether both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Read a field. On arrays, `length` reads the element count.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Field> {
        let inner = self.inner.borrow();
        if key == LENGTH && inner.target.is_array() {
            return Some(Field::Value(Value::from(inner.target.len())));
        }
        inner.target.get(key).cloned()
    }

    /// Whether `key` can be read with [`get`](Self::get), `length` on
    /// arrays included.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let inner = self.inner.borrow();
        (key == LENGTH && inner.target.is_array()) || inner.target.get(key).is_some()
    }

    /// Wrapped child under `key`, if the field is a node.
    #[must_use]
    pub fn node(&self, key: &str) -> Option<Self> {
        self.get(key).and_then(Field::into_node)
    }

    /// Follow a dotted path, descending through nodes and plain values.
    #[must_use]
    pub fn at(&self, path: &str) -> Option<Field> {
        let path = PropertyPath::parse(path);
        let mut current = Field::Node(self.clone());
        for segment in path.segments() {
            current = match current {
                Field::Node(node) => node.get(segment)?,
                Field::Value(value) => Field::Value(plain_child(&value, segment)?.clone()),
            };
        }
        Some(current)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().target.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().target.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.inner.borrow().target.is_array()
    }

    /// The node currently holding this one, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .borrow()
            .parent
            .upgrade()
            .map(|inner| Self { inner })
    }

    /// Current location of this node below its root (empty for a root).
    pub fn path(&self) -> Result<PropertyPath, TreeError> {
        Ok(propagate::ancestry(self)?
            .into_iter()
            .map(|frame| frame.name)
            .collect())
    }

    // ── Control surface ─────────────────────────────────────────────────

    /// Controller for subscriptions and typed listeners.
    #[must_use]
    pub fn watcher(&self) -> Watcher<'_> {
        Watcher { node: self }
    }

    /// Deep plain copy of the whole subtree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.target().into_value(|field| field.to_value())
    }

    /// Deep plain copy passed through `transform` (see [`clone_with`]).
    pub fn snapshot_with(&self, mut transform: impl FnMut(&Value) -> Option<Value>) -> Value {
        clone_with(&self.snapshot(), &mut transform)
    }

    /// The raw target of this node only; child nodes stay wrapped.
    #[must_use]
    pub fn target(&self) -> Composite<Field> {
        self.inner.borrow().target.clone()
    }

    /// Copy of the active settings.
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.inner.borrow().settings.clone()
    }

    /// Apply `options` to this node's settings and, with `cascade`, to every
    /// wrapped descendant.
    pub fn reconfigure(&self, options: &Options, cascade: bool) {
        let children: Vec<Self> = {
            let mut inner = self.inner.borrow_mut();
            inner.settings = options.apply(&inner.settings);
            if cascade {
                inner.target.values().filter_map(Field::as_node).cloned().collect()
            } else {
                Vec::new()
            }
        };
        debug!(cascade, children = children.len(), "node reconfigured");
        for child in children {
            child.reconfigure(options, true);
        }
    }

    /// Shorthand for `watcher().subscribe(..)`.
    pub fn subscribe<F>(
        &self,
        patterns: impl IntoPatterns,
        callback: F,
        auto_cancel: bool,
    ) -> Result<SubscriptionId, TreeError>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + 'static,
    {
        self.watcher().subscribe(patterns, callback, auto_cancel)
    }

    /// Shorthand for `watcher().unsubscribe(..)`.
    pub fn unsubscribe(&self, pattern: &str, id: Option<SubscriptionId>) -> usize {
        self.watcher().unsubscribe(pattern, id)
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Store `value` under `key` and notify subscribers.
    ///
    /// Composite values are wrapped per this node's settings. An existing
    /// node is moved here unless `clone_on_wrap` is set: it leaves the field
    /// of its previous holder (without notification there) so it always has
    /// exactly one holder. On arrays, indices past the end pad with `null`
    /// (at most [`MAX_GAP`](canopy_core::MAX_GAP) slots) and `length` resizes the array without
    /// notifying.
    pub fn set(&self, key: &str, value: impl Into<Field>) -> Result<(), TreeError> {
        if is_reserved(key) {
            return Err(TreeError::ReservedName {
                name: key.to_owned(),
            });
        }
        let value = value.into();
        if self.is_array() {
            if key == LENGTH {
                return self.set_length(&value);
            }
            if parse_index(key).is_none() {
                return Err(TreeError::InvalidKey {
                    key: key.to_owned(),
                });
            }
        }

        let field = builder::wrap_field(value, &self.settings());
        let mut moved_from = None;
        if let Field::Node(child) = &field {
            if self.has_ancestor_or_self(child) {
                return Err(TreeError::CycleDetected {
                    key: key.to_owned(),
                });
            }
            moved_from = child.slot().filter(|(holder, old_key)| {
                !(holder.ptr_eq(self) && old_key == key)
            });
        }

        let adopted = field.as_node().cloned();
        let replaced = self
            .inner
            .borrow_mut()
            .target
            .insert(key, field, || Field::Value(Value::Null))?;
        if let Some(child) = &adopted {
            child.set_parent(self);
        }
        // Inserting never shifts existing slots, so the old slot is still valid.
        if let Some((holder, old_key)) = moved_from {
            holder.inner.borrow_mut().target.remove(&old_key)?;
            debug!(from = %old_key, to = key, "node moved");
        }
        if let Some(Field::Node(old)) = replaced {
            self.release(&old);
        }

        propagate::notify(self, key)
    }

    /// Append to an array.
    pub fn push(&self, value: impl Into<Field>) -> Result<(), TreeError> {
        let key = self.len().to_string();
        if !self.is_array() {
            return Err(TreeError::InvalidKey { key });
        }
        self.set(&key, value)
    }

    /// Delete a field without notifying. Later array elements shift down,
    /// so their paths change on the next notification.
    pub fn remove(&self, key: &str) -> Result<Option<Field>, TreeError> {
        let removed = self.inner.borrow_mut().target.remove(key)?;
        if let Some(Field::Node(old)) = &removed {
            self.release(old);
        }
        Ok(removed)
    }

    fn set_length(&self, value: &Field) -> Result<(), TreeError> {
        let len = value
            .as_value()
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| TreeError::InvalidKey {
                key: LENGTH.to_owned(),
            })?;
        let tail = self
            .inner
            .borrow_mut()
            .target
            .resize_with(len, || Field::Value(Value::Null))
            .map_err(|_| TreeError::InvalidKey {
                key: LENGTH.to_owned(),
            })?;
        for field in &tail {
            if let Field::Node(old) = field {
                self.release(old);
            }
        }
        Ok(())
    }

    // ── Tree bookkeeping ────────────────────────────────────────────────

    pub(crate) fn set_parent(&self, parent: &Self) {
        self.inner.borrow_mut().parent = Rc::downgrade(&parent.inner);
    }

    fn clear_parent(&self) {
        self.inner.borrow_mut().parent = Weak::new();
    }

    fn is_parent(&self, candidate: &Self) -> bool {
        self.parent().is_some_and(|p| p.ptr_eq(candidate))
    }

    /// Detach `old` if it pointed here and this node no longer holds it.
    fn release(&self, old: &Self) {
        if old.is_parent(self) && self.key_of(old).is_none() {
            old.clear_parent();
        }
    }

    /// Whether `candidate` is this node or one of its ancestors.
    fn has_ancestor_or_self(&self, candidate: &Self) -> bool {
        let mut current = Some(self.clone());
        while let Some(node) = current {
            if node.ptr_eq(candidate) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// The live parent and the field of it holding this node.
    fn slot(&self) -> Option<(Self, String)> {
        let holder = self.parent()?;
        let key = holder.key_of(self)?;
        Some((holder, key))
    }

    /// Name of the first field holding `child`.
    pub(crate) fn key_of(&self, child: &Self) -> Option<String> {
        self.inner
            .borrow()
            .target
            .key_of(|field| field.as_node().is_some_and(|n| n.ptr_eq(child)))
    }

    /// This node's registry followed by every ancestor's, innermost first.
    pub(crate) fn registry_chain(&self) -> Vec<Rc<RefCell<Registry>>> {
        let mut chain = Vec::new();
        let mut current = Some(self.clone());
        while let Some(node) = current {
            chain.push(Rc::clone(&node.inner.borrow().registry));
            current = node.parent();
        }
        chain
    }

    pub(crate) fn listeners_for(&self, event_type: &str) -> Vec<Listener> {
        self.inner.borrow().listeners.matching(event_type)
    }

    #[cfg(test)]
    pub(crate) fn force_parent(&self, parent: &Self) {
        self.set_parent(parent);
    }
}

fn plain_child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Controller of one node: pattern subscriptions and typed listeners.
#[derive(Debug, Clone, Copy)]
pub struct Watcher<'a> {
    node: &'a Observed,
}

impl Watcher<'_> {
    /// Register `callback` under one or more patterns.
    ///
    /// With `auto_cancel`, propagation of the change halts right after the
    /// callback runs.
    pub fn subscribe<F>(
        &self,
        patterns: impl IntoPatterns,
        callback: F,
        auto_cancel: bool,
    ) -> Result<SubscriptionId, TreeError>
    where
        F: Fn(&ChangeEvent<'_>) -> Result<(), CallbackError> + 'static,
    {
        let (registry, mode) = {
            let inner = self.node.inner.borrow();
            (Rc::clone(&inner.registry), inner.settings.wildcard)
        };
        let mut registry = registry.borrow_mut();
        registry.register(patterns.into_patterns(), Rc::new(callback), auto_cancel, mode)
    }

    /// Remove one callback (`Some(id)`) or all callbacks (`None`) of
    /// `pattern`. Returns how many were removed.
    pub fn unsubscribe(&self, pattern: &str, id: Option<SubscriptionId>) -> usize {
        let registry = Rc::clone(&self.node.inner.borrow().registry);
        let removed = registry.borrow_mut().unregister(pattern, id);
        removed
    }

    /// Patterns registered on this node, in registration order.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        let registry = Rc::clone(&self.node.inner.borrow().registry);
        let patterns = registry.borrow().patterns();
        patterns
    }

    /// Listen for broadcast events of `event_type` raised by writes to this
    /// node's own fields.
    pub fn add_listener<F>(&self, event_type: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&BroadcastEvent) + 'static,
    {
        self.node
            .inner
            .borrow_mut()
            .listeners
            .add(event_type, Rc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.node.inner.borrow_mut().listeners.remove(id)
    }

    /// Deliver `event` to this node's listeners for its type.
    pub fn dispatch(&self, event: &BroadcastEvent) {
        let listeners = self.node.listeners_for(&event.event_type);
        deliver(event, &listeners, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrap;
    use serde_json::json;
    use std::cell::Cell;

    fn observe(value: Value) -> Observed {
        Observed::from_value(value, Options::default()).expect("composite")
    }

    #[test]
    fn scalars_are_not_wrapped() {
        assert!(!wrap(json!(3), Options::default()).is_observed());
        assert!(!wrap(Value::Null, Options::default()).is_observed());
        assert!(matches!(
            Observed::from_value(json!("x"), Options::default()),
            Err(TreeError::NotComposite)
        ));
    }

    #[test]
    fn reads_forward_to_target() {
        let h = observe(json!({"a": {"b": 1}, "c": [1, 2]}));
        assert!(h.has("a"));
        assert!(!h.has("zzz"));
        assert_eq!(h.keys(), vec!["a".to_string(), "c".to_string()]);
        assert!(h.get("a").expect("a").is_observed());
        assert_eq!(h.at("a.b"), Some(Field::Value(json!(1))));
        assert_eq!(h.at("c.length"), Some(Field::Value(json!(2))));
        assert_eq!(h.at("a.missing"), None);
    }

    #[test]
    fn snapshot_is_plain_and_detached() {
        let h = observe(json!({"a": {"b": [1, {"c": 2}]}}));
        let snap = h.snapshot();
        assert_eq!(snap, json!({"a": {"b": [1, {"c": 2}]}}));
        h.set("x", json!(1)).unwrap();
        assert!(snap.get("x").is_none());
    }

    #[test]
    fn snapshot_with_transforms_nodes() {
        let h = observe(json!({"a": 1, "b": {"c": 2}}));
        let out = h.snapshot_with(|v| v.as_i64().map(|n| json!(n + 100)));
        assert_eq!(out, json!({"a": 101, "b": {"c": 102}}));
    }

    #[test]
    fn target_keeps_children_wrapped() {
        let h = observe(json!({"a": {"b": 1}, "n": 5}));
        let target = h.target();
        assert!(target.get("a").expect("a").is_observed());
        assert_eq!(target.get("n"), Some(&Field::Value(json!(5))));
    }

    #[test]
    fn reserved_names_are_rejected() {
        let h = observe(json!({"a": 1}));
        for name in RESERVED_NAMES {
            let err = h.set(name, json!(1)).unwrap_err();
            assert!(matches!(err, TreeError::ReservedName { .. }));
        }
        assert_eq!(h.snapshot(), json!({"a": 1}));
    }

    #[test]
    fn children_point_at_parent() {
        let h = observe(json!({"a": {"b": {"c": 1}}}));
        let a = h.node("a").expect("a wrapped");
        let b = a.node("b").expect("b wrapped");
        assert!(a.parent().expect("a has parent").ptr_eq(&h));
        assert!(b.parent().expect("b has parent").ptr_eq(&a));
        assert!(h.parent().is_none());
        assert_eq!(b.path().unwrap().to_string(), "a.b");
    }

    #[test]
    fn set_wraps_composites() {
        let h = observe(json!({}));
        h.set("a", json!({"b": {"c": 1}})).unwrap();
        let b = h.at("a.b").and_then(Field::into_node).expect("nested node");
        assert_eq!(b.path().unwrap().to_string(), "a.b");
    }

    #[test]
    fn cycles_are_rejected() {
        let h = observe(json!({"a": {"b": {}}}));
        let a = h.node("a").unwrap();
        let b = a.node("b").unwrap();
        assert!(matches!(b.set("loop", a.clone()), Err(TreeError::CycleDetected { .. })));
        assert!(matches!(h.set("self", h.clone()), Err(TreeError::CycleDetected { .. })));
        assert!(!b.has("loop"));
    }

    #[test]
    fn array_writes() {
        let h = observe(json!({"list": [1]}));
        let list = h.node("list").unwrap();
        list.push(json!(2)).unwrap();
        list.set("4", json!(5)).unwrap();
        assert_eq!(list.snapshot(), json!([1, 2, null, null, 5]));
        list.set(LENGTH, json!(2)).unwrap();
        assert_eq!(list.snapshot(), json!([1, 2]));
        assert!(matches!(list.set("x", json!(1)), Err(TreeError::InvalidKey { .. })));
        assert!(matches!(h.push(json!(1)), Err(TreeError::InvalidKey { .. })));
    }

    #[test]
    fn overwritten_child_is_detached() {
        let h = observe(json!({"a": {"b": 1}}));
        let a = h.node("a").unwrap();
        h.set("a", json!(0)).unwrap();
        assert!(a.parent().is_none());
        assert_eq!(a.path().unwrap().to_string(), "");
    }

    #[test]
    fn remove_detaches_and_shifts() {
        let h = observe(json!({"list": [{"v": 0}, {"v": 1}]}));
        let list = h.node("list").unwrap();
        let second = list.node("1").unwrap();
        let first = list.remove("0").unwrap().and_then(Field::into_node).unwrap();
        assert!(first.parent().is_none());
        assert_eq!(second.path().unwrap().to_string(), "list.0");
    }

    #[test]
    fn reconfigure_cascades() {
        let h = observe(json!({"a": {"b": {}}}));
        h.reconfigure(&Options::new().with_propagation(true), true);
        let b = h.at("a.b").and_then(Field::into_node).unwrap();
        assert!(b.settings().propagate_to_ancestors);

        h.reconfigure(&Options::new().with_propagation(false), false);
        assert!(!h.settings().propagate_to_ancestors);
        assert!(b.settings().propagate_to_ancestors);
    }

    #[test]
    fn settings_are_a_copy() {
        let h = observe(json!({}));
        let mut s = h.settings();
        s.propagate_to_ancestors = true;
        assert!(!h.settings().propagate_to_ancestors);
    }

    #[test]
    fn watcher_lists_patterns_in_registration_order() {
        let h = observe(json!({}));
        h.subscribe(["b.*", "a"], |_| Ok(()), false).unwrap();
        h.subscribe("", |_| Ok(()), false).unwrap();
        assert_eq!(
            h.watcher().patterns(),
            vec!["b.*".to_string(), "a".to_string(), "*".to_string()]
        );
    }

    #[test]
    fn listeners_receive_dispatch() {
        let h = observe(json!({}));
        let hits = Rc::new(Cell::new(0));
        let hits2 = Rc::clone(&hits);
        let id = h.watcher().add_listener("custom", move |_| hits2.set(hits2.get() + 1));
        let event = BroadcastEvent {
            event_type: "custom".into(),
            path: "x".into(),
            property: "x".into(),
            value: json!(1),
        };
        h.watcher().dispatch(&event);
        assert_eq!(hits.get(), 1);
        assert!(h.watcher().remove_listener(id));
        h.watcher().dispatch(&event);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn dropped_root_leaves_child_as_root() {
        let h = observe(json!({"a": {"b": 1}}));
        let a = h.node("a").unwrap();
        drop(h);
        assert!(a.parent().is_none());
        a.set("b", json!(2)).unwrap();
        assert_eq!(a.snapshot(), json!({"b": 2}));
    }

    #[test]
    fn reassigning_within_parent_moves_the_node() {
        let h = observe(json!({}));
        h.set("x", observe(json!({"y": 1}))).unwrap();
        let x = h.node("x").unwrap();
        h.set("z", x.clone()).unwrap();

        assert!(!h.has("x"));
        assert!(h.node("z").unwrap().ptr_eq(&x));
        assert_eq!(x.path().unwrap().to_string(), "z");
        assert_eq!(h.snapshot(), json!({"z": {"y": 1}}));
    }

    #[test]
    fn storing_a_node_under_its_own_key_keeps_it() {
        let h = observe(json!({"a": {}, "b": 1}));
        let a = h.node("a").unwrap();
        h.set("a", a.clone()).unwrap();
        assert_eq!(h.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(a.parent().unwrap().ptr_eq(&h));
    }

    #[test]
    fn moving_between_parents_leaves_one_holder() {
        let h = observe(json!({"left": {"item": {"v": 0}}, "right": {}}));
        let left = h.node("left").unwrap();
        let right = h.node("right").unwrap();
        let item = left.node("item").unwrap();

        right.set("item", item.clone()).unwrap();
        assert!(!left.has("item"));
        assert_eq!(item.path().unwrap().to_string(), "right.item");

        // `left` is no longer related to `item`, so nesting it is legal.
        item.set("back", left.clone()).unwrap();
        assert!(!h.has("left"));
        assert_eq!(left.path().unwrap().to_string(), "right.item.back");
        assert_eq!(h.snapshot(), json!({"right": {"item": {"v": 0, "back": {}}}}));

        assert!(matches!(
            item.set("loop", right),
            Err(TreeError::CycleDetected { .. })
        ));
    }

    #[test]
    fn moving_within_an_array_reindexes() {
        let h = observe(json!({"list": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}));
        let list = h.node("list").unwrap();
        let c = list.node("2").unwrap();
        list.set("0", c.clone()).unwrap();
        assert_eq!(list.snapshot(), json!([{"id": "c"}, {"id": "b"}]));
        assert_eq!(c.path().unwrap().to_string(), "list.0");
    }

    #[test]
    fn oversized_array_writes_are_rejected() {
        let h = observe(json!({"list": [1]}));
        let list = h.node("list").unwrap();
        assert!(matches!(
            list.set(LENGTH, json!(u64::MAX)),
            Err(TreeError::InvalidKey { .. })
        ));
        assert!(matches!(
            list.set("4000000000", json!(1)),
            Err(TreeError::InvalidKey { .. })
        ));
        assert_eq!(list.snapshot(), json!([1]));
    }

    #[test]
    fn array_length_is_readable_and_present() {
        let h = observe(json!({"list": [1, 2], "obj": {}}));
        let list = h.node("list").unwrap();
        assert!(list.has(LENGTH));
        assert_eq!(list.get(LENGTH), Some(Field::Value(json!(2))));
        let obj = h.node("obj").unwrap();
        assert!(!obj.has(LENGTH));
        assert_eq!(obj.get(LENGTH), None);
    }
}
