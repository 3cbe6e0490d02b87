//! Deferred calls.
//!
//! A [`DeferredCall`] is one unit of incremental work: the field futures of
//! one defer block (or one streamed list item) plus the place its payload
//! attaches. Field futures are lazy; nothing runs until [`DeferredCall::invoke`].

use crate::aggregator::ErrorAggregator;
use crate::error::InvocationError;
use crate::payload::{IncrementalPayload, PayloadKind};
use futures::future::{BoxFuture, join_all};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use trickle_core::{CallId, FieldError, ResultPath};

/// Pending completion of one field (or one streamed item)
pub type FieldFuture = BoxFuture<'static, Result<Value, FieldError>>;

/// One field owned by a deferred call
pub struct DeferredField {
    /// Result key; unused for stream items
    result_key: String,
    /// Where the value lands, used to locate its errors
    path: ResultPath,
    /// Null here nulls the whole payload
    non_null: bool,
    future: FieldFuture,
}

impl DeferredField {
    /// Create a field
    pub fn new<F>(result_key: impl Into<String>, path: ResultPath, non_null: bool, future: F) -> Self
    where
        F: Future<Output = Result<Value, FieldError>> + Send + 'static,
    {
        Self {
            result_key: result_key.into(),
            path,
            non_null,
            future: future.boxed(),
        }
    }

    /// Result key
    #[must_use]
    pub fn result_key(&self) -> &str {
        &self.result_key
    }
}

impl std::fmt::Debug for DeferredField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredField")
            .field("result_key", &self.result_key)
            .field("path", &self.path)
            .field("non_null", &self.non_null)
            .finish_non_exhaustive()
    }
}

/// One deferred unit of work producing exactly one payload
#[derive(Debug)]
pub struct DeferredCall {
    id: CallId,
    label: Option<String>,
    path: ResultPath,
    kind: PayloadKind,
    fields: Vec<DeferredField>,
    errors: ErrorAggregator,
}

impl DeferredCall {
    /// Create a defer call attaching object data at `path`
    #[must_use]
    pub fn defer(label: Option<String>, path: ResultPath, errors: ErrorAggregator) -> Self {
        Self::with_kind(PayloadKind::Defer, label, path, errors)
    }

    /// Create a stream call attaching list items at `path`
    ///
    /// `path` is the list path followed by the index of the first item.
    #[must_use]
    pub fn stream(label: Option<String>, path: ResultPath, errors: ErrorAggregator) -> Self {
        Self::with_kind(PayloadKind::Stream, label, path, errors)
    }

    fn with_kind(
        kind: PayloadKind,
        label: Option<String>,
        path: ResultPath,
        errors: ErrorAggregator,
    ) -> Self {
        Self {
            id: CallId::new(),
            label,
            path,
            kind,
            fields: Vec::new(),
            errors,
        }
    }

    /// Add a field future
    #[must_use]
    pub fn with_field(mut self, field: DeferredField) -> Self {
        self.push_field(field);
        self
    }

    /// Add a field future in place
    pub fn push_field(&mut self, field: DeferredField) {
        self.fields.push(field);
    }

    /// Call identifier
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Label of the originating directive
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Where the payload attaches
    #[must_use]
    pub fn path(&self) -> &ResultPath {
        &self.path
    }

    /// Payload shape
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Number of field futures
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Error scope of this call
    #[must_use]
    pub fn errors(&self) -> &ErrorAggregator {
        &self.errors
    }

    /// Run every field future and build the payload
    ///
    /// A failing field becomes `null` and its error is reported in the
    /// payload. A `null` non-null field nulls the whole payload body.
    /// Values keep field declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] only when the join itself breaks, i.e. a
    /// field future panicked
    pub async fn invoke(self) -> Result<IncrementalPayload, InvocationError> {
        let Self {
            id,
            label,
            path,
            kind,
            fields,
            errors,
        } = self;

        let (meta, futures): (Vec<_>, Vec<_>) = fields
            .into_iter()
            .map(|f| ((f.result_key, f.path, f.non_null), f.future))
            .unzip();

        let results = AssertUnwindSafe(join_all(futures))
            .catch_unwind()
            .await
            .map_err(|panic| InvocationError {
                call: id,
                label: label.clone(),
                reason: panic_reason(panic.as_ref()),
            })?;

        let mut values = Vec::with_capacity(results.len());
        let mut nulled = false;
        for ((result_key, field_path, non_null), result) in meta.into_iter().zip(results) {
            let value = match result {
                Ok(value) => {
                    if non_null && value.is_null() {
                        errors.add_error(FieldError::non_nullable_field_was_null(field_path));
                    }
                    value
                }
                Err(error) => {
                    errors.add_error(error.or_at(&field_path));
                    Value::Null
                }
            };
            nulled |= non_null && value.is_null();
            values.push((result_key, value));
        }

        let errors = errors.drain();
        let payload = match kind {
            PayloadKind::Defer => {
                let data = (!nulled).then(|| values.into_iter().collect::<IndexMap<_, _>>());
                IncrementalPayload::defer(path, label, data, errors)
            }
            PayloadKind::Stream => {
                let items = (!nulled).then(|| values.into_iter().map(|(_, v)| v).collect());
                IncrementalPayload::stream(path, label, items, errors)
            }
        };
        Ok(payload)
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("field future panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("field future panicked: {}", message)
    } else {
        "field future panicked".to_string()
    }
}
