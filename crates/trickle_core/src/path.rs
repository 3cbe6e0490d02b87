//! Result paths.
//!
//! A [`ResultPath`] locates a value inside the overall response tree as a
//! sequence of field names and list indices. Paths render as
//! `/hero/friends[2]/name` and serialize as `["hero", "friends", 2, "name"]`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step in a [`ResultPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A list index
    Index(usize),
    /// A field result key
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "/{}", key),
            Self::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Location of a value in the result tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultPath {
    segments: Vec<PathSegment>,
}

impl ResultPath {
    /// The root path (no segments)
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Build a path from segments
    #[must_use]
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// New path with a field key appended
    #[must_use]
    pub fn segment(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        Self { segments }
    }

    /// New path with a list index appended
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// Parent path, or `None` at the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Last segment, or `None` at the root
    #[must_use]
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Number of field-key segments (list indices do not add a level)
    #[must_use]
    pub fn level(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Key(_)))
            .count()
    }

    /// Whether this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Borrow the segments
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Path as a JSON list of keys and indices
    #[must_use]
    pub fn to_list(&self) -> Vec<serde_json::Value> {
        self.segments
            .iter()
            .map(|s| match s {
                PathSegment::Key(key) => serde_json::Value::String(key.clone()),
                PathSegment::Index(index) => serde_json::Value::from(*index),
            })
            .collect()
    }

    /// Parse the `/a/b[0]/c` form produced by `Display`
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPath` on malformed input
    pub fn parse(input: &str) -> CoreResult<Self> {
        let text = input.trim();
        let invalid = |reason: &str| CoreError::InvalidPath {
            input: text.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            match c {
                '/' => {
                    let body = &rest[1..];
                    let end = body.find(['/', '[', ']']).unwrap_or(body.len());
                    if end == 0 {
                        return Err(invalid("empty field segment"));
                    }
                    segments.push(PathSegment::Key(body[..end].to_string()));
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                    let index = rest[1..close]
                        .parse::<usize>()
                        .map_err(|_| invalid("list index is not a number"))?;
                    segments.push(PathSegment::Index(index));
                    rest = &rest[close + 1..];
                }
                _ => return Err(invalid("expected '/' or '['")),
            }
        }

        Ok(Self { segments })
    }
}

impl fmt::Display for ResultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
