//! Field-level errors.
//!
//! These are query errors, carried as data inside results. They never
//! terminate an incremental stream.

use crate::path::ResultPath;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An error raised while resolving or completing a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Human readable message
    pub message: String,
    /// Where in the result the error occurred
    #[serde(default, skip_serializing_if = "ResultPath::is_root")]
    pub path: ResultPath,
    /// Resolver supplied extensions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, serde_json::Value>>,
}

impl FieldError {
    /// Create an error with no location
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: ResultPath::root(),
            extensions: None,
        }
    }

    /// Attach a location, replacing any existing one
    #[must_use]
    pub fn at(mut self, path: ResultPath) -> Self {
        self.path = path;
        self
    }

    /// Attach a location only if none was set by the resolver
    #[must_use]
    pub fn or_at(self, path: &ResultPath) -> Self {
        if self.path.is_root() {
            self.at(path.clone())
        } else {
            self
        }
    }

    /// Add an extension entry
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// The error reported when a non-null field resolved to null
    #[must_use]
    pub fn non_nullable_field_was_null(path: ResultPath) -> Self {
        Self::new(format!(
            "Cannot return null for non-nullable field at '{}'",
            path
        ))
        .at(path)
        .with_extension("classification", serde_json::Value::from("NullValueInNonNullableField"))
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (at {})", self.message, self.path)
        }
    }
}

impl std::error::Error for FieldError {}
