//! Field resolution boundary.
//!
//! The runtime never fetches data itself. Every field value comes from a
//! [`FieldResolver`], which may suspend for as long as it likes and may
//! fail with a [`FieldError`].

use crate::aggregator::ErrorAggregator;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use trickle_core::{FieldError, ResultPath};
use trickle_plan::{FieldNode, Variables};

/// Everything a resolver knows about the field it resolves
#[derive(Debug, Clone)]
pub struct FieldContext {
    /// The field being resolved
    pub field: Arc<FieldNode>,
    /// Where the value lands in the result
    pub path: ResultPath,
    /// Resolved value of the parent object (`Null` at the root when no
    /// root value was given)
    pub source: Value,
    /// Operation variables
    pub variables: Arc<Variables>,
    /// Error scope of the result this field belongs to
    pub errors: ErrorAggregator,
}

impl FieldContext {
    /// Create a context
    #[must_use]
    pub fn new(
        field: Arc<FieldNode>,
        path: ResultPath,
        source: Value,
        variables: Arc<Variables>,
        errors: ErrorAggregator,
    ) -> Self {
        Self {
            field,
            path,
            source,
            variables,
            errors,
        }
    }

    /// Argument value by name
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.field.arguments.get(name)
    }

    /// Record a partial error without failing the field
    pub fn add_error(&self, error: FieldError) {
        self.errors.add_error(error.or_at(&self.path));
    }
}

/// Resolves the value of one field
#[async_trait]
pub trait FieldResolver: Send + Sync {
    /// Resolve the field described by `ctx`
    ///
    /// # Errors
    ///
    /// Returns a field error; the field becomes `null` and the error is
    /// reported with the result that contains it
    async fn resolve(&self, ctx: FieldContext) -> Result<Value, FieldError>;
}

/// Reads `source[field.name]`, the default resolution of object fields
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyResolver;

#[async_trait]
impl FieldResolver for PropertyResolver {
    async fn resolve(&self, ctx: FieldContext) -> Result<Value, FieldError> {
        Ok(ctx
            .source
            .get(ctx.field.name.as_str())
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Adapts an async closure into a [`FieldResolver`]
pub struct FnResolver<F> {
    func: F,
}

impl<F> FnResolver<F> {
    /// Wrap a closure
    #[must_use]
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> FieldResolver for FnResolver<F>
where
    F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FieldError>> + Send + 'static,
{
    async fn resolve(&self, ctx: FieldContext) -> Result<Value, FieldError> {
        (self.func)(ctx).await
    }
}

/// Build a shared resolver from an async closure
#[must_use]
pub fn resolver_fn<F, Fut>(func: F) -> Arc<dyn FieldResolver>
where
    F: Fn(FieldContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, FieldError>> + Send + 'static,
{
    Arc::new(FnResolver::new(func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_context(field: FieldNode, source: Value) -> FieldContext {
        let path = ResultPath::root().segment(field.result_key());
        FieldContext::new(
            Arc::new(field),
            path,
            source,
            Arc::new(Variables::new()),
            ErrorAggregator::new(),
        )
    }

    #[tokio::test]
    async fn test_property_resolver() {
        let ctx = make_context(FieldNode::new("name"), json!({"name": "Luke", "age": 19}));
        assert_eq!(PropertyResolver.resolve(ctx).await, Ok(json!("Luke")));

        let ctx = make_context(FieldNode::new("missing"), json!({"name": "Luke"}));
        assert_eq!(PropertyResolver.resolve(ctx).await, Ok(Value::Null));

        let ctx = make_context(FieldNode::new("name"), Value::Null);
        assert_eq!(PropertyResolver.resolve(ctx).await, Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_resolver_fn_reads_arguments() {
        let resolver = resolver_fn(|ctx: FieldContext| async move {
            let n = ctx.argument("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });
        let ctx = make_context(FieldNode::new("double").with_argument("n", json!(21)), Value::Null);
        assert_eq!(resolver.resolve(ctx).await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_resolver_fn_failure() {
        let resolver = resolver_fn(|_ctx: FieldContext| async move {
            Err(FieldError::new("backend unavailable"))
        });
        let ctx = make_context(FieldNode::new("x"), Value::Null);
        assert_eq!(
            resolver.resolve(ctx).await,
            Err(FieldError::new("backend unavailable"))
        );
    }

    #[test]
    fn test_context_partial_error_gets_field_path() {
        let ctx = make_context(FieldNode::new("friends"), Value::Null);
        ctx.add_error(FieldError::new("one friend missing"));

        let errors = ctx.errors.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, ResultPath::root().segment("friends"));
    }
}
