//! TRICKLE Planner
//!
//! Selection plans consumed by the incremental runtime, the pluggable
//! decision of which fields are deferred or streamed, and plan validation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decide;
pub mod plan;
pub mod validate;

pub use decide::{DeferDecider, DeferExecution, DirectiveDecider, NeverDefer, StreamExecution};
pub use plan::{Condition, DeferDirective, FieldNode, SelectionPlan, StreamDirective, Variables};
pub use validate::{PlanError, PlanValidator};
