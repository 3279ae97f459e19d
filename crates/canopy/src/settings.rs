#![forbid(unsafe_code)]

//! Per-node settings and partial overrides.
//!
//! [`Settings`] is the complete snapshot every node carries; [`Options`] is a
//! partial override applied on top of it (at construction, on top of the
//! defaults; on [`reconfigure`](crate::Observed::reconfigure), on top of the
//! node's current settings). Both can be read from JSON documents:
//!
//! ```json
//! { "max_depth": 2, "propagate_to_ancestors": true, "wildcard": "strict" }
//! ```
//!
//! `max_depth` uses `-1` for "unlimited". Broadcast sinks and the
//! subscription scope are runtime objects and can only be set in code.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::SinkRef;
use crate::error::TreeError;
use crate::matcher::WildcardMode;
use crate::registry::Scope;

/// Default broadcast event type.
pub const DEFAULT_EVENT_TYPE: &str = "watch";

/// How deep below a node composite values are wrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MaxDepth {
    /// Every nested composite is wrapped.
    #[default]
    Unlimited,
    /// Wrap this many levels below the node; `0` keeps children plain.
    Limited(u32),
}

impl MaxDepth {
    /// Depth for the node's children, or `None` when children stay plain.
    #[must_use]
    pub fn descend(self) -> Option<Self> {
        match self {
            Self::Unlimited => Some(Self::Unlimited),
            Self::Limited(0) => None,
            Self::Limited(n) => Some(Self::Limited(n - 1)),
        }
    }
}

impl From<i64> for MaxDepth {
    fn from(depth: i64) -> Self {
        if depth < 0 {
            Self::Unlimited
        } else {
            Self::Limited(u32::try_from(depth).unwrap_or(u32::MAX))
        }
    }
}

impl From<MaxDepth> for i64 {
    fn from(depth: MaxDepth) -> Self {
        match depth {
            MaxDepth::Unlimited => -1,
            MaxDepth::Limited(n) => i64::from(n),
        }
    }
}

/// What a failing subscriber callback interrupts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackErrorPolicy {
    /// Skip the remaining callbacks of the current level; ancestors are
    /// still notified and the first error is returned at the end.
    #[default]
    AbortLevel,
    /// Stop the whole notification and return the error immediately.
    AbortBubble,
}

/// Complete settings snapshot held by every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Depth of recursive wrapping.
    pub max_depth: MaxDepth,
    /// Deep-copy already-observed nodes written into the tree instead of
    /// adopting them.
    pub clone_on_wrap: bool,
    /// Notify ancestor levels after the originating level.
    pub propagate_to_ancestors: bool,
    /// Wildcard semantics for patterns registered on this node.
    pub wildcard: WildcardMode,
    /// Reaction to a failing subscriber callback.
    pub callback_errors: CallbackErrorPolicy,
    /// Type tag of broadcast events.
    pub event_type: String,
    /// External sinks receiving broadcast events.
    #[serde(skip)]
    pub broadcast_targets: Vec<SinkRef>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_depth: MaxDepth::Unlimited,
            clone_on_wrap: false,
            propagate_to_ancestors: false,
            wildcard: WildcardMode::Permissive,
            callback_errors: CallbackErrorPolicy::AbortLevel,
            event_type: DEFAULT_EVENT_TYPE.to_owned(),
            broadcast_targets: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON document merged onto the defaults.
    ///
    /// Unknown keys are ignored; missing keys keep their default.
    pub fn from_json(doc: &Value) -> Result<Self, TreeError> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = canopy_core::merge(&defaults, doc);
        Ok(serde_json::from_value(merged)?)
    }

    /// Settings for wrapped children, or `None` if children stay plain.
    #[must_use]
    pub fn for_children(&self) -> Option<Self> {
        let max_depth = self.max_depth.descend()?;
        Some(Self {
            max_depth,
            ..self.clone()
        })
    }
}

/// Partial override of [`Settings`]. Unset fields leave the base untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Options {
    pub max_depth: Option<MaxDepth>,
    pub clone_on_wrap: Option<bool>,
    pub propagate_to_ancestors: Option<bool>,
    pub wildcard: Option<WildcardMode>,
    pub callback_errors: Option<CallbackErrorPolicy>,
    pub event_type: Option<String>,
    #[serde(skip)]
    pub broadcast_targets: Option<Vec<SinkRef>>,
    /// Subscription scope of a newly wrapped root. Ignored by `reconfigure`.
    #[serde(skip)]
    pub scope: Option<Scope>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read options from a JSON document.
    pub fn from_json(doc: &Value) -> Result<Self, TreeError> {
        Ok(serde_json::from_value(doc.clone())?)
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: MaxDepth) -> Self {
        self.max_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_clone_on_wrap(mut self, enabled: bool) -> Self {
        self.clone_on_wrap = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_propagation(mut self, enabled: bool) -> Self {
        self.propagate_to_ancestors = Some(enabled);
        self
    }

    #[must_use]
    pub fn with_wildcard(mut self, mode: WildcardMode) -> Self {
        self.wildcard = Some(mode);
        self
    }

    #[must_use]
    pub fn with_callback_errors(mut self, policy: CallbackErrorPolicy) -> Self {
        self.callback_errors = Some(policy);
        self
    }

    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    #[must_use]
    pub fn with_broadcast_target(mut self, sink: SinkRef) -> Self {
        self.broadcast_targets.get_or_insert_with(Vec::new).push(sink);
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// `base` with every set field of `self` overriding it.
    #[must_use]
    pub fn apply(&self, base: &Settings) -> Settings {
        Settings {
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            clone_on_wrap: self.clone_on_wrap.unwrap_or(base.clone_on_wrap),
            propagate_to_ancestors: self
                .propagate_to_ancestors
                .unwrap_or(base.propagate_to_ancestors),
            wildcard: self.wildcard.unwrap_or(base.wildcard),
            callback_errors: self.callback_errors.unwrap_or(base.callback_errors),
            event_type: self
                .event_type
                .clone()
                .unwrap_or_else(|| base.event_type.clone()),
            broadcast_targets: self
                .broadcast_targets
                .clone()
                .unwrap_or_else(|| base.broadcast_targets.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.max_depth, MaxDepth::Unlimited);
        assert!(!s.clone_on_wrap);
        assert!(!s.propagate_to_ancestors);
        assert_eq!(s.event_type, "watch");
        assert!(s.broadcast_targets.is_empty());
    }

    #[test]
    fn depth_descends_until_zero() {
        assert_eq!(MaxDepth::Limited(2).descend(), Some(MaxDepth::Limited(1)));
        assert_eq!(MaxDepth::Limited(1).descend(), Some(MaxDepth::Limited(0)));
        assert_eq!(MaxDepth::Limited(0).descend(), None);
        assert_eq!(MaxDepth::Unlimited.descend(), Some(MaxDepth::Unlimited));
    }

    #[test]
    fn negative_depth_is_unlimited() {
        assert_eq!(MaxDepth::from(-1_i64), MaxDepth::Unlimited);
        assert_eq!(MaxDepth::from(-42_i64), MaxDepth::Unlimited);
        assert_eq!(i64::from(MaxDepth::Unlimited), -1);
        assert_eq!(MaxDepth::from(3_i64), MaxDepth::Limited(3));
    }

    #[test]
    fn settings_from_json_merges_onto_defaults() {
        let s = Settings::from_json(&json!({
            "max_depth": 2,
            "propagate_to_ancestors": true,
            "wildcard": "strict",
            "callback_errors": "abort_bubble",
        }))
        .expect("valid config");
        assert_eq!(s.max_depth, MaxDepth::Limited(2));
        assert!(s.propagate_to_ancestors);
        assert!(!s.clone_on_wrap);
        assert_eq!(s.wildcard, WildcardMode::Strict);
        assert_eq!(s.callback_errors, CallbackErrorPolicy::AbortBubble);
        assert_eq!(s.event_type, DEFAULT_EVENT_TYPE);
    }

    #[test]
    fn settings_from_json_rejects_bad_types() {
        let err = Settings::from_json(&json!({"clone_on_wrap": "yes"})).unwrap_err();
        assert!(matches!(err, TreeError::Config(_)));
    }

    #[test]
    fn options_apply_only_set_fields() {
        let base = Settings {
            propagate_to_ancestors: true,
            ..Settings::default()
        };
        let merged = Options::new().with_max_depth(MaxDepth::Limited(1)).apply(&base);
        assert_eq!(merged.max_depth, MaxDepth::Limited(1));
        assert!(merged.propagate_to_ancestors);
    }

    #[test]
    fn options_from_json() {
        let opts = Options::from_json(&json!({"max_depth": -1, "event_type": "change"}))
            .expect("valid options");
        assert_eq!(opts.max_depth, Some(MaxDepth::Unlimited));
        assert_eq!(opts.event_type.as_deref(), Some("change"));
        assert_eq!(opts.clone_on_wrap, None);
    }

    #[test]
    fn children_inherit_with_decremented_depth() {
        let s = Settings {
            max_depth: MaxDepth::Limited(1),
            propagate_to_ancestors: true,
            ..Settings::default()
        };
        let child = s.for_children().expect("depth 1 wraps children");
        assert_eq!(child.max_depth, MaxDepth::Limited(0));
        assert!(child.propagate_to_ancestors);
        assert!(child.for_children().is_none());
    }
}
