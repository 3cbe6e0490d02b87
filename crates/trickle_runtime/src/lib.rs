//! TRICKLE Runtime
//!
//! Incremental execution: resolves the initial part of a query, then
//! delivers deferred and streamed fragments as they complete through a
//! single-subscriber stream with exactly one terminal event.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod call;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod monitor;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod sink;

pub use aggregator::ErrorAggregator;
pub use call::{DeferredCall, DeferredField, FieldFuture};
pub use config::IncrementalConfig;
pub use coordinator::{CoordinatorHandle, CoordinatorState, IncrementalCoordinator};
pub use error::{InvocationError, SinkError, StreamError};
pub use execution::{ExecutionOutcome, PrimaryExecutor};
pub use monitor::IncrementalMetrics;
pub use payload::{DelayedIncrementalResult, IncrementalPayload, InitialResult, PayloadBody, PayloadKind};
pub use registry::PendingCallRegistry;
pub use resolver::{FieldContext, FieldResolver, FnResolver, PropertyResolver, resolver_fn};
pub use sink::{ResultSink, ResultStream};
