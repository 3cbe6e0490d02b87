//! Deferral decisions.
//!
//! The runtime never looks at directives itself. It asks a [`DeferDecider`]
//! whether a field should be deferred or streamed, so directive evaluation
//! stays pluggable.

use crate::plan::{FieldNode, Variables};
use serde::{Deserialize, Serialize};

/// One active defer for a field
///
/// Fields whose decisions compare equal at the same selection level are
/// delivered together in a single payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeferExecution {
    /// Label of the defer block
    pub label: Option<String>,
    /// Fragment type condition
    pub target_type: Option<String>,
}

impl DeferExecution {
    /// Create a decision
    #[must_use]
    pub fn new(label: Option<String>, target_type: Option<String>) -> Self {
        Self { label, target_type }
    }
}

/// An active stream for a list field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamExecution {
    /// Label of the stream
    pub label: Option<String>,
    /// Items completed with the enclosing result
    pub initial_count: usize,
}

/// Decides which fields are delivered incrementally
pub trait DeferDecider: Send + Sync {
    /// Every active defer for `node`; empty means "resolve inline"
    fn defer_executions(&self, node: &FieldNode, variables: &Variables) -> Vec<DeferExecution>;

    /// Active stream for `node`, if any
    fn stream_execution(&self, node: &FieldNode, variables: &Variables) -> Option<StreamExecution>;

    /// First active defer for `node`
    fn should_defer(&self, node: &FieldNode, variables: &Variables) -> Option<DeferExecution> {
        self.defer_executions(node, variables).into_iter().next()
    }
}

/// Reads `@defer`/`@stream` straight off the plan and evaluates their `if:`
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveDecider;

impl DeferDecider for DirectiveDecider {
    fn defer_executions(&self, node: &FieldNode, variables: &Variables) -> Vec<DeferExecution> {
        let mut executions: Vec<DeferExecution> = Vec::new();
        for directive in node.defers.iter().filter(|d| d.condition.evaluate(variables)) {
            let execution =
                DeferExecution::new(directive.label.clone(), directive.target_type.clone());
            if !executions.contains(&execution) {
                executions.push(execution);
            }
        }
        executions
    }

    fn stream_execution(&self, node: &FieldNode, variables: &Variables) -> Option<StreamExecution> {
        if !node.list {
            return None;
        }
        node.stream
            .as_ref()
            .filter(|s| s.condition.evaluate(variables))
            .map(|s| StreamExecution {
                label: s.label.clone(),
                initial_count: s.initial_count,
            })
    }
}

/// Never defers or streams anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDefer;

impl DeferDecider for NeverDefer {
    fn defer_executions(&self, _node: &FieldNode, _variables: &Variables) -> Vec<DeferExecution> {
        Vec::new()
    }

    fn stream_execution(&self, _node: &FieldNode, _variables: &Variables) -> Option<StreamExecution> {
        None
    }
}
