//! Pending deferred call bookkeeping.
//!
//! One registry exists per top-level execution. It owns every
//! [`DeferredCall`] from registration until the coordinator takes it,
//! and counts calls that are registered but not yet completed.
//!
//! Invariant: `pending_count() >= queued_count()`. The pending count is
//! raised before a call becomes visible in the queue and lowered exactly
//! once per call, when its payload is emitted.

use crate::call::DeferredCall;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Registry of deferred calls for one execution
pub struct PendingCallRegistry {
    /// Calls not yet invoked, in registration order
    queue: Mutex<VecDeque<DeferredCall>>,
    /// Calls registered but not yet completed
    pending: AtomicUsize,
    /// Calls ever registered
    registered: AtomicUsize,
    /// Set on first registration, never cleared
    defer_detected: AtomicBool,
    /// Set once the stream has terminated
    closed: AtomicBool,
}

impl PendingCallRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            registered: AtomicUsize::new(0),
            defer_detected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Register one call
    pub fn enqueue(&self, call: DeferredCall) {
        self.enqueue_all(std::iter::once(call));
    }

    /// Register a batch of calls
    ///
    /// The pending count rises by the batch size in one step, so a
    /// completion never observes part of a batch.
    pub fn enqueue_all(&self, calls: impl IntoIterator<Item = DeferredCall>) {
        let calls: Vec<DeferredCall> = calls.into_iter().collect();
        if calls.is_empty() {
            return;
        }

        let mut queue = self.queue.lock();
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(
                dropped = calls.len(),
                "deferred calls registered after the stream terminated"
            );
            return;
        }

        let count = calls.len();
        self.pending.fetch_add(count, Ordering::AcqRel);
        self.registered.fetch_add(count, Ordering::Relaxed);
        self.defer_detected.store(true, Ordering::Release);
        for call in calls {
            tracing::trace!(call_id = %call.id(), label = ?call.label(), path = %call.path(), "deferred call registered");
            queue.push_back(call);
        }
    }

    /// Take the oldest queued call
    pub fn pop(&self) -> Option<DeferredCall> {
        self.queue.lock().pop_front()
    }

    /// Record one completion and return the calls still pending
    ///
    /// Callers must hold the emission lock so that the returned count and
    /// the event they emit form one step.
    ///
    /// # Panics
    ///
    /// Panics if no call is pending; that means a call completed twice.
    pub fn complete_one(&self) -> usize {
        match self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => panic!("deferred call completed with no calls pending"),
        }
    }

    /// Refuse further registrations and drop any queued calls
    pub fn close(&self) {
        let mut queue = self.queue.lock();
        self.closed.store(true, Ordering::Release);
        if !queue.is_empty() {
            tracing::debug!(abandoned = queue.len(), "abandoning queued deferred calls");
            queue.clear();
        }
    }

    /// Whether any call was ever registered
    #[must_use]
    pub fn is_defer_detected(&self) -> bool {
        self.defer_detected.load(Ordering::Acquire)
    }

    /// Whether calls remain pending (diagnostics only)
    #[must_use]
    pub fn has_more_work(&self) -> bool {
        self.pending_count() > 0
    }

    /// Calls registered but not yet completed
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Calls waiting to be invoked
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Calls ever registered
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    /// Whether the registry was closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for PendingCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}
