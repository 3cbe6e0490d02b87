//! Runtime error types.
//!
//! Field failures are data and live in payloads as [`trickle_core::FieldError`].
//! The types here describe failures of the delivery machinery itself.

use trickle_core::CallId;

/// Terminal error delivered to the subscriber of an incremental stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// A deferred call broke instead of producing a payload
    #[error("Deferred call {call} failed: {reason}")]
    InvocationFailed {
        /// The failing call
        call: CallId,
        /// Its label, if any
        label: Option<String>,
        /// What went wrong
        reason: String,
    },

    /// The execution was cancelled before every payload was delivered
    #[error("Incremental delivery cancelled")]
    Cancelled,

    /// Calls are pending but none are queued or running
    #[error("Incremental delivery stalled with {pending} pending calls")]
    Stalled {
        /// Pending count at the time
        pending: usize,
    },

    /// A call task died outside of its invocation
    #[error("Deferred call task failed: {reason}")]
    TaskFailed {
        /// What went wrong
        reason: String,
    },
}

/// Result sink errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink's single subscription was already taken
    #[error("Result sink already has a subscriber")]
    AlreadySubscribed,

    /// The sink delivered its terminal event or the subscriber went away
    #[error("Result sink is closed")]
    Closed,
}

/// Failure of [`crate::DeferredCall::invoke`] itself, as opposed to a field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Deferred call {call} failed: {reason}")]
pub struct InvocationError {
    /// The failing call
    pub call: CallId,
    /// Its label, if any
    pub label: Option<String>,
    /// What went wrong
    pub reason: String,
}

impl From<InvocationError> for StreamError {
    fn from(err: InvocationError) -> Self {
        Self::InvocationFailed {
            call: err.call,
            label: err.label,
            reason: err.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        assert_eq!(StreamError::Cancelled.to_string(), "Incremental delivery cancelled");
        assert_eq!(
            StreamError::Stalled { pending: 2 }.to_string(),
            "Incremental delivery stalled with 2 pending calls"
        );
    }

    #[test]
    fn test_invocation_error_into_stream_error() {
        let call = CallId::new();
        let err = InvocationError {
            call,
            label: Some("slow".to_string()),
            reason: "resolver panicked".to_string(),
        };
        let stream_err: StreamError = err.into();
        assert_eq!(
            stream_err,
            StreamError::InvocationFailed {
                call,
                label: Some("slow".to_string()),
                reason: "resolver panicked".to_string(),
            }
        );
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(SinkError::AlreadySubscribed.to_string(), "Result sink already has a subscriber");
        assert_eq!(SinkError::Closed.to_string(), "Result sink is closed");
    }
}
