#![forbid(unsafe_code)]

//! Hierarchical reactive observation tree.
//!
//! Wrap a JSON-shaped value and every write to it, at any depth, is
//! attributed a fully-qualified dotted path (`a.b.2.c`) and delivered to
//! callbacks subscribed to matching path patterns.
//!
//! - [`Observed`]: handle to a wrapped object or array. Reads and writes go
//!   through [`get`](Observed::get) / [`set`](Observed::set); nested
//!   composites are themselves `Observed`.
//! - [`PathMatcher`]: compiles patterns with `*` and `?` wildcards.
//! - [`Registry`]: per-node pattern table, merged across ancestors.
//! - [`ChangeEvent`]: what a callback receives, including [`cancel`](ChangeEvent::cancel).
//! - [`BroadcastSink`]: secondary, type-tagged channel for external consumers.
//!
//! # Example
//!
//! ```
//! use canopy::{Options, wrap};
//! use serde_json::json;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let root = wrap(json!({"a": {"b": 1}}), Options::default())
//!     .into_node()
//!     .unwrap();
//! let calls = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&calls);
//! root.subscribe("a.b", move |ev| {
//!     assert_eq!(ev.path(), "a.b");
//!     seen.set(seen.get() + 1);
//!     Ok(())
//! }, false).unwrap();
//!
//! root.node("a").unwrap().set("b", json!(2)).unwrap();
//! assert_eq!(calls.get(), 1);
//! ```
//!
//! # Invariants
//!
//! 1. Paths are recomputed from the current parent chain on every write.
//! 2. Callbacks run in registration order; cancellation stops every later
//!    callback of the same write, at every level.
//! 3. Ancestor levels are notified only with `propagate_to_ancestors`.
//! 4. Reserved control names are never stored as data.
//! 5. The tree is single-threaded (`!Send`) and fully synchronous.

pub mod broadcast;
pub mod builder;
pub mod error;
pub mod matcher;
pub mod node;
pub mod propagate;
pub mod registry;
pub mod settings;

pub use broadcast::{BroadcastEvent, BroadcastSink, JsonlSink, ListenerId, SinkRef};
pub use builder::wrap;
pub use canopy_core::{Composite, PropertyPath};
pub use error::{CallbackError, TreeError};
pub use matcher::{PathMatcher, WildcardMode};
pub use node::{Field, Observed, RESERVED_NAMES, Watcher};
pub use propagate::ChangeEvent;
pub use registry::{IntoPatterns, Registry, Scope, SharedScope, SubscriptionId};
pub use settings::{CallbackErrorPolicy, MaxDepth, Options, Settings};
