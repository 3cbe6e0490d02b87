//! Incremental coordinator.
//!
//! Drains a [`PendingCallRegistry`] into a [`ResultSink`]. A driver task pops
//! queued calls in registration order and runs each in its own task; calls
//! therefore complete, and are emitted, in completion order. After every
//! completion the driver drains the queue again, which picks up calls that
//! were registered while the completed call was resolving.
//!
//! Each call task finishes inside one critical section, the sink lock:
//! decrement the pending count, build `hasNext` from the value it returned,
//! push the event. Exactly one event therefore carries `hasNext: false`, and
//! it is the last one.
//!
//! State machine: `Idle -> Draining -> (Done | Error)`.

use crate::call::DeferredCall;
use crate::config::IncrementalConfig;
use crate::error::StreamError;
use crate::monitor::IncrementalMetrics;
use crate::payload::DelayedIncrementalResult;
use crate::registry::PendingCallRegistry;
use crate::sink::{ResultSink, ResultStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use trickle_core::{CallId, ExecutionId};

type SharedSink = Arc<tokio::sync::Mutex<ResultSink<DelayedIncrementalResult>>>;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// Created, not started
    Idle,
    /// Invoking calls and emitting payloads
    Draining,
    /// The last payload was delivered
    Done,
    /// The stream ended with an error, a cancellation or a lost subscriber
    Error,
}

impl CoordinatorState {
    /// Whether the stream has ended
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// State shared by the coordinator, its driver and its handles
struct Shared {
    execution_id: ExecutionId,
    registry: Arc<PendingCallRegistry>,
    state: Mutex<CoordinatorState>,
    metrics: Mutex<IncrementalMetrics>,
    cancel: CancellationToken,
}

impl Shared {
    fn state(&self) -> CoordinatorState {
        *self.state.lock()
    }

    fn begin(&self) {
        let mut state = self.state.lock();
        if *state == CoordinatorState::Idle {
            *state = CoordinatorState::Draining;
        }
    }

    /// Move to a terminal state; the first terminal state wins
    fn finish(&self, next: CoordinatorState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            tracing::debug!(execution_id = %self.execution_id, from = ?*state, to = ?next, "coordinator state change");
            *state = next;
        }
    }
}

/// Observes and cancels a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    shared: Arc<Shared>,
}

impl CoordinatorHandle {
    /// Execution this coordinator belongs to
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.shared.execution_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    /// Metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> IncrementalMetrics {
        let mut metrics = self.shared.metrics.lock().clone();
        metrics.calls_enqueued = self.shared.registry.registered_count() as u64;
        metrics
    }

    /// Stop starting queued calls and end the stream with
    /// [`StreamError::Cancelled`]
    ///
    /// Calls already running are aborted. No effect once the stream ended.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Whether calls remain pending
    #[must_use]
    pub fn has_more_work(&self) -> bool {
        self.shared.registry.has_more_work()
    }
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("execution_id", &self.shared.execution_id)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Drives the deferred calls of one execution into a single ordered stream
pub struct IncrementalCoordinator {
    config: IncrementalConfig,
    shared: Arc<Shared>,
}

impl IncrementalCoordinator {
    /// Create a coordinator for the calls of `registry`
    #[must_use]
    pub fn new(registry: Arc<PendingCallRegistry>, config: IncrementalConfig) -> Self {
        Self::with_execution_id(ExecutionId::new(), registry, config)
    }

    /// Create a coordinator with a known execution id
    #[must_use]
    pub fn with_execution_id(
        execution_id: ExecutionId,
        registry: Arc<PendingCallRegistry>,
        config: IncrementalConfig,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                execution_id,
                registry,
                state: Mutex::new(CoordinatorState::Idle),
                metrics: Mutex::new(IncrementalMetrics::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Execution id
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.shared.execution_id
    }

    /// The registry being drained
    #[must_use]
    pub fn registry(&self) -> &Arc<PendingCallRegistry> {
        &self.shared.registry
    }

    /// Register a call
    pub fn enqueue(&self, call: DeferredCall) {
        self.shared.registry.enqueue(call);
    }

    /// Register a batch of calls
    pub fn enqueue_all(&self, calls: impl IntoIterator<Item = DeferredCall>) {
        self.shared.registry.enqueue_all(calls);
    }

    /// Whether any call was ever registered
    #[must_use]
    pub fn is_defer_detected(&self) -> bool {
        self.shared.registry.is_defer_detected()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    /// Handle for observation and cancellation
    #[must_use]
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start draining and return the payload stream
    ///
    /// Returns immediately; the stream fills as calls complete. With no
    /// registered calls the stream completes without items.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn start_deferred_calls(self) -> ResultStream<DelayedIncrementalResult> {
        let (sink, stream) = ResultSink::channel(self.config.sink_capacity);
        let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));

        self.shared.begin();
        tracing::debug!(
            execution_id = %self.shared.execution_id,
            pending = self.shared.registry.pending_count(),
            "starting deferred calls"
        );

        let span = tracing::debug_span!("incremental", execution_id = %self.shared.execution_id);
        tokio::spawn(drive(self.shared, sink, self.config.max_concurrent_calls).instrument(span));
        stream
    }
}

/// How one call task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallOutcome {
    /// Payload emitted with this many calls still pending
    Emitted { remaining: usize },
    /// Invocation failed; the stream carries the error
    Failed,
    /// Subscriber dropped the stream
    SubscriberGone,
    /// Stream had already ended; result discarded
    Discarded,
}

async fn drive(shared: Arc<Shared>, sink: SharedSink, max_concurrent: usize) {
    let registry = shared.registry.clone();
    let mut in_flight: JoinSet<CallOutcome> = JoinSet::new();

    loop {
        if shared.cancel.is_cancelled() {
            in_flight.abort_all();
            terminate(&shared, &sink, StreamError::Cancelled).await;
            break;
        }

        while max_concurrent == 0 || in_flight.len() < max_concurrent {
            let Some(call) = registry.pop() else {
                break;
            };
            shared.metrics.lock().record_invocation(in_flight.len() + 1);
            let span = tracing::debug_span!("deferred_call", call_id = %call.id(), label = ?call.label());
            in_flight.spawn(run_call(call, shared.clone(), sink.clone()).instrument(span));
        }

        if in_flight.is_empty() {
            let pending = registry.pending_count();
            if pending == 0 {
                let mut sink = sink.lock().await;
                if !sink.is_terminated() {
                    shared.finish(CoordinatorState::Done);
                    sink.no_more_data();
                }
            } else {
                terminate(&shared, &sink, StreamError::Stalled { pending }).await;
            }
            break;
        }

        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => continue,
            joined = in_flight.join_next() => match joined {
                Some(Ok(CallOutcome::Emitted { remaining })) if remaining > 0 => {}
                Some(Ok(outcome)) => {
                    tracing::trace!(?outcome, "stream ended by call");
                    break;
                }
                Some(Err(err)) => {
                    in_flight.abort_all();
                    terminate(&shared, &sink, StreamError::TaskFailed { reason: err.to_string() }).await;
                    break;
                }
                None => {}
            },
        }
    }

    in_flight.abort_all();
    registry.close();
    tracing::debug!(
        state = ?shared.state(),
        metrics = ?shared.metrics.lock().clone(),
        "deferred calls finished"
    );
}

/// Invoke one call and emit its payload inside the sink critical section
async fn run_call(call: DeferredCall, shared: Arc<Shared>, sink: SharedSink) -> CallOutcome {
    let id: CallId = call.id();
    let result = call.invoke().await;

    let mut sink = sink.lock().await;
    if sink.is_terminated() {
        tracing::trace!(call_id = %id, "discarding result of a finished stream");
        return CallOutcome::Discarded;
    }

    let payload = match result {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(call_id = %id, reason = %err.reason, "deferred call invocation failed");
            shared.metrics.lock().record_fatal();
            shared.finish(CoordinatorState::Error);
            if sink.offer_error(err.into()).await.is_err() {
                tracing::debug!(call_id = %id, "subscriber gone before the error was delivered");
            }
            return CallOutcome::Failed;
        }
    };

    let remaining = shared.registry.complete_one();
    shared.metrics.lock().record_completion(payload.errors.len());
    tracing::debug!(call_id = %id, label = ?payload.label, remaining, "deferred call completed");

    let event = DelayedIncrementalResult::single(payload, remaining != 0);
    if sink.offer(event).await.is_err() {
        tracing::debug!(call_id = %id, "subscriber dropped the incremental stream");
        shared.finish(CoordinatorState::Error);
        return CallOutcome::SubscriberGone;
    }
    shared.metrics.lock().record_emission();

    if remaining == 0 {
        shared.finish(CoordinatorState::Done);
        sink.no_more_data();
    }
    CallOutcome::Emitted { remaining }
}

/// End the stream with `error` unless it already ended
async fn terminate(shared: &Shared, sink: &SharedSink, error: StreamError) {
    let mut sink = sink.lock().await;
    if sink.is_terminated() {
        return;
    }
    if error != StreamError::Cancelled {
        tracing::warn!(execution_id = %shared.execution_id, %error, "incremental delivery failed");
        shared.metrics.lock().record_fatal();
    } else {
        tracing::debug!(execution_id = %shared.execution_id, "incremental delivery cancelled");
    }
    shared.finish(CoordinatorState::Error);
    if sink.offer_error(error).await.is_err() {
        tracing::debug!("subscriber gone before the terminal error was delivered");
    }
}
