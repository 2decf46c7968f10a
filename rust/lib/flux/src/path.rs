use std::fmt;

use crate::error::StoreError;

/// Segment separator for state paths.
pub const SEPARATOR: char = '.';

/// A validated dot-delimited state path, e.g. `user.isAuthenticated`.
///
/// A path is valid when it is non-empty and every segment between dots is
/// non-empty (`a..b`, `.a` and `a.` are rejected).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatePath {
    raw: String,
}

impl StatePath {
    /// Parse and validate a path string.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if raw.is_empty() || raw.split(SEPARATOR).any(str::is_empty) {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// The path as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Iterate over the segments from root to leaf.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.raw.split(SEPARATOR)
    }

    /// Split into (parent segments, leaf segment).
    pub fn split_leaf(&self) -> (Vec<&str>, &str) {
        let mut segments: Vec<&str> = self.segments().collect();
        // parse() guarantees at least one segment.
        let leaf = segments.pop().unwrap_or_default();
        (segments, leaf)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
