//! Selection plans.
//!
//! A [`SelectionPlan`] is the immutable, already-validated field tree that the
//! runtime walks. Each [`FieldNode`] may carry the `@defer` directives of the
//! fragments it was collected from and an optional `@stream` directive.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Coerced variables of one execution
pub type Variables = IndexMap<String, Value>;

/// The `if:` argument of `@defer`/`@stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// A literal boolean
    Literal(bool),
    /// A variable reference (without the `$`)
    Variable(String),
}

impl Condition {
    /// Evaluate against the execution variables
    ///
    /// A missing or non-boolean variable falls back to the directive
    /// default of `true`.
    #[must_use]
    pub fn evaluate(&self, variables: &Variables) -> bool {
        match self {
            Self::Literal(value) => *value,
            Self::Variable(name) => variables
                .get(name)
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::Literal(true)
    }
}

/// A `@defer` directive on the fragment enclosing a field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferDirective {
    /// Optional label
    #[serde(default)]
    pub label: Option<String>,
    /// Type condition of the enclosing fragment
    #[serde(default)]
    pub target_type: Option<String>,
    /// `if:` argument
    #[serde(default, rename = "if")]
    pub condition: Condition,
}

impl DeferDirective {
    /// Unlabeled, unconditional defer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Labeled, unconditional defer
    #[must_use]
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Set the fragment type condition
    #[must_use]
    pub fn with_target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    /// Set the `if:` condition
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// A `@stream` directive on a list field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDirective {
    /// Optional label
    #[serde(default)]
    pub label: Option<String>,
    /// Items returned with the initial result
    #[serde(default, rename = "initialCount")]
    pub initial_count: usize,
    /// `if:` argument
    #[serde(default, rename = "if")]
    pub condition: Condition,
}

impl StreamDirective {
    /// Stream everything after the first `initial_count` items
    #[must_use]
    pub fn new(initial_count: usize) -> Self {
        Self {
            initial_count,
            ..Self::default()
        }
    }

    /// Set the label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the `if:` condition
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }
}

/// A field in a selection plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    /// Schema field name
    pub name: String,
    /// Response alias
    #[serde(default)]
    pub alias: Option<String>,
    /// Coerced arguments
    #[serde(default)]
    pub arguments: IndexMap<String, Value>,
    /// Whether the field type is non-null
    #[serde(default)]
    pub non_null: bool,
    /// Whether the field type is a list
    #[serde(default)]
    pub list: bool,
    /// `@defer` directives of every fragment this field was collected from
    #[serde(default)]
    pub defers: Vec<DeferDirective>,
    /// `@stream` directive
    #[serde(default)]
    pub stream: Option<StreamDirective>,
    /// Sub-selections
    #[serde(default)]
    pub selections: Vec<Arc<FieldNode>>,
}

impl FieldNode {
    /// Create a nullable scalar field
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: IndexMap::new(),
            non_null: false,
            list: false,
            defers: Vec::new(),
            stream: None,
            selections: Vec::new(),
        }
    }

    /// Key under which this field appears in the result
    #[must_use]
    pub fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Set the alias
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add an argument
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Mark the field non-null
    #[must_use]
    pub fn non_null(mut self) -> Self {
        self.non_null = true;
        self
    }

    /// Mark the field as list-typed
    #[must_use]
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Add a `@defer` directive
    #[must_use]
    pub fn deferred(mut self, directive: DeferDirective) -> Self {
        self.defers.push(directive);
        self
    }

    /// Set the `@stream` directive
    #[must_use]
    pub fn streamed(mut self, directive: StreamDirective) -> Self {
        self.stream = Some(directive);
        self
    }

    /// Add a sub-selection
    #[must_use]
    pub fn select(mut self, child: FieldNode) -> Self {
        self.selections.push(Arc::new(child));
        self
    }

    /// Whether the field has sub-selections
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.selections.is_empty()
    }
}

/// An immutable tree of fields for one operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionPlan {
    /// Operation name
    #[serde(default)]
    pub operation_name: Option<String>,
    /// Root selections
    pub fields: Vec<Arc<FieldNode>>,
}

impl SelectionPlan {
    /// Create a plan from root fields
    #[must_use]
    pub fn new(fields: Vec<FieldNode>) -> Self {
        Self {
            operation_name: None,
            fields: fields.into_iter().map(Arc::new).collect(),
        }
    }

    /// Set the operation name
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Total number of fields in the tree
    #[must_use]
    pub fn field_count(&self) -> usize {
        fn count(nodes: &[Arc<FieldNode>]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.selections)).sum()
        }
        count(&self.fields)
    }

    /// Whether any field carries a `@defer` or `@stream` directive
    #[must_use]
    pub fn has_incremental_directives(&self) -> bool {
        fn any(nodes: &[Arc<FieldNode>]) -> bool {
            nodes
                .iter()
                .any(|n| !n.defers.is_empty() || n.stream.is_some() || any(&n.selections))
        }
        any(&self.fields)
    }

    /// Check if the plan is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a plan from its JSON form
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a plan
    pub fn from_json(json: &str) -> trickle_core::CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
