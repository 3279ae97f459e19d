#![forbid(unsafe_code)]

//! Subscription pattern compilation.
//!
//! A pattern is a dotted path that may contain wildcards:
//!
//! | Token | Permissive              | Strict                  |
//! |-------|-------------------------|-------------------------|
//! | `*`   | any run, dots included  | any run without a dot   |
//! | `?`   | any run without a dot   | any run without a dot   |
//!
//! The empty pattern and the bare `*` match every path in both modes.
//! Everything else is literal. Patterns are anchored: they must match the
//! whole fully-qualified path, never a fragment of it.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Pattern that matches every path.
pub const MATCH_ALL: &str = "*";

/// How `*` treats the `.` separator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WildcardMode {
    /// `*` crosses segment boundaries.
    #[default]
    Permissive,
    /// `*` stays within one segment.
    Strict,
}

/// A compiled subscription pattern.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
}

impl PathMatcher {
    /// Compile `pattern` into an anchored matcher.
    pub fn compile(pattern: &str, mode: WildcardMode) -> Result<Self, TreeError> {
        let source = if pattern.is_empty() || pattern == MATCH_ALL {
            "^.*$".to_owned()
        } else {
            translate(pattern, mode)
        };
        let regex = Regex::new(&source).map_err(|source| TreeError::Pattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// The pattern text this matcher was compiled from.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `path` (a full dotted path) matches.
    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn translate(pattern: &str, mode: WildcardMode) -> String {
    let star = match mode {
        WildcardMode::Permissive => ".*",
        WildcardMode::Strict => "[^.]*",
    };
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut literal = String::new();
    for ch in pattern.chars() {
        let token = match ch {
            '*' => star,
            '?' => "[^.]*",
            _ => {
                literal.push(ch);
                continue;
            }
        };
        out.push_str(&regex::escape(&literal));
        literal.clear();
        out.push_str(token);
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}
