//! TRICKLE Core Types
//!
//! Pure types shared by the planner and the incremental runtime.
//! Nothing in this crate performs I/O or spawns tasks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod field_error;
pub mod id;
pub mod path;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use field_error::FieldError;
pub use id::{CallId, ExecutionId};
pub use path::{PathSegment, ResultPath};

/// Result values produced by field resolution.
pub use serde_json::Value;
