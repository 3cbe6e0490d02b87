//! Per-call error collection.

use parking_lot::Mutex;
use std::sync::Arc;
use trickle_core::FieldError;

/// Collects field errors for exactly one deferred call (or the initial result)
///
/// Clones share the same buffer, so every field completion of one call can
/// hold its own handle. A fresh aggregator is created for each call, which
/// keeps one branch's errors out of another's payload.
#[derive(Debug, Clone, Default)]
pub struct ErrorAggregator {
    errors: Arc<Mutex<Vec<FieldError>>>,
}

impl ErrorAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error
    pub fn add_error(&self, error: FieldError) {
        tracing::trace!(message = %error.message, path = %error.path, "field error recorded");
        self.errors.lock().push(error);
    }

    /// Record several errors
    pub fn add_errors(&self, errors: impl IntoIterator<Item = FieldError>) {
        self.errors.lock().extend(errors);
    }

    /// Snapshot of the errors recorded so far
    #[must_use]
    pub fn errors(&self) -> Vec<FieldError> {
        self.errors.lock().clone()
    }

    /// Number of errors recorded
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Take every recorded error, leaving the aggregator empty
    #[must_use]
    pub fn drain(&self) -> Vec<FieldError> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Whether two handles share one buffer
    #[must_use]
    pub fn same_scope(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.errors, &other.errors)
    }
}
