#![forbid(unsafe_code)]

//! Dotted, fully-qualified property paths.

use std::fmt;

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// A sequence of property names from an observation root down to a field.
///
/// Displays as the segments joined with `.` (`a.b.2.c`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<String>,
}

impl PropertyPath {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a dotted string. The empty string is the empty path.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::new();
        }
        Self {
            segments: dotted.split(SEPARATOR).map(str::to_owned).collect(),
        }
    }

    pub fn push(&mut self, segment: impl Into<String>) {
        self.segments.push(segment.into());
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, the name of the field itself.
    #[must_use]
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The first `len` segments.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments[..len.min(self.segments.len())].to_vec(),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromIterator<String> for PropertyPath {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}
