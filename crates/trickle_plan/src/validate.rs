//! Selection plan validator.

use super::plan::{FieldNode, SelectionPlan};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use trickle_core::ResultPath;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Two defer or stream directives share a label
    #[error("Duplicate incremental label '{label}' at {path}")]
    DuplicateLabel {
        /// The label
        label: String,
        /// Where the second use occurs
        path: ResultPath,
    },

    /// Two sibling fields share a result key
    #[error("Duplicate result key '{key}' at {path}")]
    DuplicateResultKey {
        /// The key
        key: String,
        /// Selection set holding both fields
        path: ResultPath,
    },

    /// `@stream` on a field that is not a list
    #[error("@stream used on non-list field at {path}")]
    StreamOnNonList {
        /// Offending field
        path: ResultPath,
    },

    /// The plan nests deeper than allowed
    #[error("Selection depth exceeds {max} at {path}")]
    DepthExceeded {
        /// Configured maximum
        max: usize,
        /// First field past the limit
        path: ResultPath,
    },
}

/// Validator for selection plans
pub struct PlanValidator {
    /// Reject labels reused across defer/stream directives
    pub require_unique_labels: bool,
    /// Maximum selection depth (0 = no limit)
    pub max_depth: usize,
}

impl PlanValidator {
    /// Create a new validator
    #[must_use]
    pub fn new() -> Self {
        Self {
            require_unique_labels: true,
            max_depth: 0,
        }
    }

    /// Validate a plan
    ///
    /// # Errors
    ///
    /// Returns every problem found
    pub fn validate(&self, plan: &SelectionPlan) -> Result<(), Vec<PlanError>> {
        let mut errors = Vec::new();
        let mut labels = IndexMap::new();

        self.check_selections(&plan.fields, &ResultPath::root(), &mut labels, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_selections(
        &self,
        fields: &[Arc<FieldNode>],
        parent: &ResultPath,
        labels: &mut IndexMap<String, ResultPath>,
        errors: &mut Vec<PlanError>,
    ) {
        let mut keys = IndexSet::new();

        for field in fields {
            let path = parent.segment(field.result_key());

            if !keys.insert(field.result_key().to_string()) {
                errors.push(PlanError::DuplicateResultKey {
                    key: field.result_key().to_string(),
                    path: parent.clone(),
                });
            }

            if self.max_depth > 0 && path.level() > self.max_depth {
                errors.push(PlanError::DepthExceeded {
                    max: self.max_depth,
                    path,
                });
                continue;
            }

            if field.stream.is_some() && !field.list {
                errors.push(PlanError::StreamOnNonList { path: path.clone() });
            }

            self.check_labels(field, &path, labels, errors);
            self.check_selections(&field.selections, &path, labels, errors);
        }
    }

    fn check_labels(
        &self,
        field: &FieldNode,
        path: &ResultPath,
        labels: &mut IndexMap<String, ResultPath>,
        errors: &mut Vec<PlanError>,
    ) {
        if !self.require_unique_labels {
            return;
        }

        // Fields of one selection set repeat their fragment's directive; a
        // label is only reused if a different selection set claims it.
        let owner = path.parent().unwrap_or_default();
        let stream_label = field.stream.as_ref().and_then(|s| s.label.as_ref());
        let field_labels = field
            .defers
            .iter()
            .filter_map(|d| d.label.as_ref())
            .chain(stream_label);

        for label in field_labels {
            match labels.get(label) {
                Some(claimed) if *claimed != owner => {
                    errors.push(PlanError::DuplicateLabel {
                        label: label.clone(),
                        path: path.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    labels.insert(label.clone(), owner.clone());
                }
            }
        }
    }

    /// Reject labels reused across directives
    #[must_use]
    pub fn with_unique_labels(mut self, require: bool) -> Self {
        self.require_unique_labels = require;
        self
    }

    /// Set maximum selection depth
    #[must_use]
    pub fn with_max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::new()
    }
}
