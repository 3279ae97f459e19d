#![forbid(unsafe_code)]

//! Errors raised by the observation tree.

use std::fmt;

/// Error type a subscriber callback may return.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

/// Errors from tree reads, writes, and notification.
#[derive(Debug)]
pub enum TreeError {
    /// A write targeted a reserved control name. The write was not performed.
    ReservedName { name: String },
    /// A mutated node could not be located among its parent's properties.
    ///
    /// Indicates broken parent bookkeeping. The write itself already happened.
    PathResolution { property: String },
    /// A subscriber callback failed while handling a change at `path`.
    ///
    /// The write that triggered the notification already happened.
    Callback { path: String, source: CallbackError },
    /// Storing the node under `key` would make it its own ancestor.
    CycleDetected { key: String },
    /// The key does not address a slot of this node (e.g. `"x"` on an array).
    InvalidKey { key: String },
    /// Only objects and arrays can be observed.
    NotComposite,
    /// A subscription pattern failed to compile.
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    /// A configuration document could not be read into settings.
    Config(serde_json::Error),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedName { name } => write!(f, "`{name}` is a reserved name"),
            Self::PathResolution { property } => {
                write!(f, "could not locate `{property}` among its parent's properties")
            }
            Self::Callback { path, source } => {
                write!(f, "subscriber callback for `{path}` failed: {source}")
            }
            Self::CycleDetected { key } => {
                write!(f, "storing a node under `{key}` would create a cycle")
            }
            Self::InvalidKey { key } => write!(f, "invalid key `{key}`"),
            Self::NotComposite => write!(f, "only objects and arrays can be observed"),
            Self::Pattern { pattern, source } => {
                write!(f, "invalid pattern `{pattern}`: {source}")
            }
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Callback { source, .. } => Some(source.as_ref()),
            Self::Pattern { source, .. } => Some(source),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err)
    }
}

impl From<canopy_core::composite::IndexError> for TreeError {
    fn from(err: canopy_core::composite::IndexError) -> Self {
        Self::InvalidKey { key: err.key }
    }
}
