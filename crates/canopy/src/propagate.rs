#![forbid(unsafe_code)]

//! Change notification: path resolution, dispatch, and bubbling.
//!
//! # Design
//!
//! A write to `node[property]` runs through three phases:
//!
//! 1. **Path resolution**: walk `parent` links up to the root, locating each
//!    node among its holder's fields. The result is a stack of [`Frame`]s
//!    (`holder`, `name`), root first. Paths are never cached: array
//!    elements move, so locations are recomputed on every write.
//! 2. **Dispatch**: at the originating node, merge its subscriptions with
//!    every ancestor's and invoke the callbacks of each matching pattern in
//!    registration order.
//! 3. **Bubble** (only with `propagate_to_ancestors`): repeat dispatch at each
//!    ancestor, nearest first, each with its own shorter path.
//!
//! Before dispatch the write is announced on the broadcast channel at every
//! level, whatever `propagate_to_ancestors` says.
//!
//! One [`Envelope`] is created per write and shared by every level. Its
//! cancel flag is set by [`ChangeEvent::cancel`] or by an `auto_cancel`
//! subscription; once set, no further callback runs at any level.
//!
//! # Failure Modes
//!
//! - A node missing from its holder's fields aborts the notification with
//!   [`TreeError::PathResolution`]. The write already happened.
//! - A callback error ends the current level. Under
//!   [`CallbackErrorPolicy::AbortLevel`] ancestors are still notified and the
//!   first error is returned afterwards; under `AbortBubble` it is returned
//!   immediately.
//!
//! Callbacks run with no node or registry borrowed, so a callback may write
//! to the tree; the nested write completes its own notification before the
//! outer one resumes.

use std::cell::Cell;

use canopy_core::PropertyPath;
use serde_json::Value;
use tracing::{trace, warn};

use crate::broadcast::{BroadcastEvent, SinkRef, deliver};
use crate::error::TreeError;
use crate::node::{Field, Observed};
use crate::registry;
use crate::settings::CallbackErrorPolicy;

/// Kind tag of change envelopes.
pub const CHANGE: &str = "change";

/// One step of a resolved path: `name` is the field of `node` on the way
/// down to the written field.
#[derive(Debug, Clone)]
pub struct Frame {
    pub node: Observed,
    pub name: String,
}

/// State shared by every level of one write's notification.
#[derive(Debug)]
pub struct Envelope {
    source: Observed,
    from: String,
    cancelled: Cell<bool>,
}

impl Envelope {
    fn new(source: Observed, from: String) -> Self {
        Self {
            source,
            from,
            cancelled: Cell::new(false),
        }
    }

    fn cancel(&self) {
        self.cancelled.set(true);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// What a subscriber callback receives.
#[derive(Debug)]
pub struct ChangeEvent<'a> {
    path: &'a str,
    property: &'a str,
    value: Option<Field>,
    node: &'a Observed,
    envelope: &'a Envelope,
}

impl ChangeEvent<'_> {
    /// Fully-qualified path at the level being notified.
    #[must_use]
    pub fn path(&self) -> &str {
        self.path
    }

    /// Last segment of [`path`](Self::path).
    #[must_use]
    pub fn property(&self) -> &str {
        self.property
    }

    /// Current field at [`path`](Self::path); `None` if it was removed.
    #[must_use]
    pub fn value(&self) -> Option<&Field> {
        self.value.as_ref()
    }

    /// Plain copy of [`value`](Self::value) (`null` if absent).
    #[must_use]
    pub fn value_snapshot(&self) -> Value {
        self.value.as_ref().map_or(Value::Null, Field::to_value)
    }

    /// Node holding [`property`](Self::property) at this level.
    #[must_use]
    pub fn node(&self) -> &Observed {
        self.node
    }

    /// Node whose field was written.
    #[must_use]
    pub fn source(&self) -> &Observed {
        &self.envelope.source
    }

    /// Full path of the written field.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.envelope.from
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        CHANGE
    }

    /// Stop every remaining callback of this change, at all levels.
    pub fn cancel(&self) {
        self.envelope.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.envelope.is_cancelled()
    }
}

/// Frames from the root down to `node`'s own location (empty for a root).
pub(crate) fn ancestry(node: &Observed) -> Result<Vec<Frame>, TreeError> {
    let mut frames = Vec::new();
    let mut current = node.clone();
    while let Some(holder) = current.parent() {
        let Some(name) = holder.key_of(&current) else {
            let below = join_rev(&frames);
            warn!(below = %below, "node missing from its parent's fields");
            return Err(TreeError::PathResolution { property: below });
        };
        frames.push(Frame {
            node: holder.clone(),
            name,
        });
        current = holder;
    }
    frames.reverse();
    Ok(frames)
}

fn join_rev(frames: &[Frame]) -> String {
    frames
        .iter()
        .rev()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Notify subscribers of a write to `origin[property]`.
pub(crate) fn notify(origin: &Observed, property: &str) -> Result<(), TreeError> {
    let mut frames = ancestry(origin).map_err(|err| match err {
        TreeError::PathResolution { .. } => TreeError::PathResolution {
            property: property.to_owned(),
        },
        other => other,
    })?;
    frames.push(Frame {
        node: origin.clone(),
        name: property.to_owned(),
    });
    let mut path = PropertyPath::new();
    for frame in &frames {
        path.push(frame.name.clone());
    }
    let settings = origin.settings();

    broadcast(&frames, &path, &settings.broadcast_targets);

    let envelope = Envelope::new(origin.clone(), path.to_string());
    let mut first_error = None;
    for depth in (1..=frames.len()).rev() {
        let level_path = path.prefix(depth).to_string();
        trace!(path = %level_path, from = %envelope.from, "dispatching change");
        if let Err(err) = dispatch(&frames[depth - 1], &level_path, &envelope) {
            match settings.callback_errors {
                CallbackErrorPolicy::AbortBubble => return Err(err),
                CallbackErrorPolicy::AbortLevel => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if envelope.is_cancelled() || !settings.propagate_to_ancestors {
            break;
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn dispatch(frame: &Frame, path: &str, envelope: &Envelope) -> Result<(), TreeError> {
    let subscriptions = registry::merged(frame.node.registry_chain());
    if subscriptions.is_empty() {
        return Ok(());
    }
    let event = ChangeEvent {
        path,
        property: &frame.name,
        value: frame.node.get(&frame.name),
        node: &frame.node,
        envelope,
    };
    for (_, entry) in &subscriptions {
        if !entry.matcher.is_match(path) {
            continue;
        }
        for registration in &entry.callbacks {
            if envelope.is_cancelled() {
                return Ok(());
            }
            (registration.callback)(&event).map_err(|source| TreeError::Callback {
                path: path.to_owned(),
                source,
            })?;
            if registration.auto_cancel {
                envelope.cancel();
            }
        }
    }
    Ok(())
}

/// Announce the write on every level, nearest first.
///
/// Each holder's listeners for its own event type hear the change under
/// that level's path. Sinks are shared down the tree through settings, so
/// they are fed once, with the full path.
fn broadcast(frames: &[Frame], path: &PropertyPath, sinks: &[SinkRef]) {
    for depth in (1..=frames.len()).rev() {
        let frame = &frames[depth - 1];
        let event_type = frame.node.settings().event_type;
        let listeners = frame.node.listeners_for(&event_type);
        let sinks: &[SinkRef] = if depth == frames.len() { sinks } else { &[] };
        if listeners.is_empty() && sinks.is_empty() {
            continue;
        }
        let level = path.prefix(depth);
        let event = BroadcastEvent {
            event_type,
            path: level.to_string(),
            property: level.leaf().unwrap_or_default().to_owned(),
            value: frame.node.get(&frame.name).map_or(Value::Null, |f| f.to_value()),
        };
        deliver(&event, &listeners, sinks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Options;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn observe(value: Value) -> Observed {
        Observed::from_value(value, Options::default()).expect("composite")
    }

    #[test]
    fn ancestry_of_root_is_empty() {
        assert!(ancestry(&observe(json!({}))).unwrap().is_empty());
    }

    #[test]
    fn ancestry_lists_holders_root_first() {
        let h = observe(json!({"a": [{"b": {}}]}));
        let b = h.at("a.0.b").and_then(Field::into_node).unwrap();
        let names: Vec<_> = ancestry(&b).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a", "0", "b"]);
    }

    #[test]
    fn broken_parent_link_is_a_resolution_error() {
        let h = observe(json!({"a": {}}));
        let stray = observe(json!({}));
        stray.force_parent(&h);
        let err = stray.set("x", json!(1)).unwrap_err();
        assert!(matches!(err, TreeError::PathResolution { ref property } if property == "x"));
        // The write itself went through.
        assert_eq!(stray.snapshot(), json!({"x": 1}));
    }

    #[test]
    fn event_exposes_envelope() {
        let h = observe(json!({"a": {"b": 1}}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        let root = h.clone();
        h.subscribe(
            "a.b",
            move |ev| {
                assert_eq!(ev.kind(), CHANGE);
                assert!(!ev.source().ptr_eq(&root));
                assert!(ev.node().ptr_eq(ev.source()));
                log.borrow_mut().push((
                    ev.path().to_owned(),
                    ev.property().to_owned(),
                    ev.from().to_owned(),
                    ev.value_snapshot(),
                ));
                Ok(())
            },
            false,
        )
        .unwrap();
        h.node("a").unwrap().set("b", json!(7)).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![("a.b".to_string(), "b".to_string(), "a.b".to_string(), json!(7))]
        );
    }

    #[test]
    fn ancestor_levels_see_their_own_path() {
        let h = Observed::from_value(
            json!({"a": {"b": {"c": 0}}}),
            Options::new().with_propagation(true),
        )
        .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        h.subscribe(
            "*",
            move |ev| {
                log.borrow_mut().push((ev.path().to_owned(), ev.from().to_owned()));
                Ok(())
            },
            false,
        )
        .unwrap();
        h.at("a.b").and_then(Field::into_node).unwrap().set("c", json!(1)).unwrap();
        let paths: Vec<_> = seen.borrow().iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec!["a.b.c", "a.b", "a"]);
        assert!(seen.borrow().iter().all(|(_, from)| from == "a.b.c"));
    }

    #[test]
    fn ancestor_event_value_is_the_child_node() {
        let h = Observed::from_value(json!({"a": {"b": 0}}), Options::new().with_propagation(true))
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        h.subscribe(
            "a",
            move |ev| {
                log.borrow_mut().push(ev.value().map(Field::is_observed));
                Ok(())
            },
            false,
        )
        .unwrap();
        h.node("a").unwrap().set("b", json!(1)).unwrap();
        assert_eq!(*seen.borrow(), vec![Some(true)]);
    }
}
