//! Primary execution path.
//!
//! Walks a [`SelectionPlan`] and resolves every field that is not deferred.
//! Deferred fields are grouped per defer execution and selection level into
//! [`DeferredCall`]s and registered without being awaited; list items past a
//! stream's initial count become one stream call each. Deferred subtrees run
//! the same walk when their call is invoked, so defers nested inside them
//! register further calls at that point.

use crate::aggregator::ErrorAggregator;
use crate::call::{DeferredCall, DeferredField};
use crate::config::IncrementalConfig;
use crate::coordinator::IncrementalCoordinator;
use crate::payload::{DelayedIncrementalResult, InitialResult};
use crate::registry::PendingCallRegistry;
use crate::resolver::{FieldContext, FieldResolver};
use crate::sink::ResultStream;
use futures::future::{BoxFuture, Shared, join_all};
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use trickle_core::{ExecutionId, FieldError, ResultPath};
use trickle_plan::{
    DeferDecider, DeferExecution, DirectiveDecider, FieldNode, SelectionPlan, StreamExecution,
    Variables,
};

/// One field resolved once on behalf of several defer executions
type SharedResolution = Shared<BoxFuture<'static, (Result<Value, FieldError>, Vec<FieldError>)>>;

/// Executes the non-deferred part of a plan and prepares the rest
pub struct PrimaryExecutor {
    resolver: Arc<dyn FieldResolver>,
    decider: Arc<dyn DeferDecider>,
    config: IncrementalConfig,
}

impl PrimaryExecutor {
    /// Create an executor reading `@defer`/`@stream` off the plan
    #[must_use]
    pub fn new(resolver: Arc<dyn FieldResolver>) -> Self {
        Self {
            resolver,
            decider: Arc::new(DirectiveDecider),
            config: IncrementalConfig::default(),
        }
    }

    /// Replace the deferral decision
    #[must_use]
    pub fn with_decider(mut self, decider: Arc<dyn DeferDecider>) -> Self {
        self.decider = decider;
        self
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: IncrementalConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &IncrementalConfig {
        &self.config
    }

    /// Resolve the initial result and hand deferred work to a coordinator
    ///
    /// Deferred calls are registered but not invoked; they run once the
    /// returned coordinator is started.
    pub async fn execute(&self, plan: &SelectionPlan, root: Value, variables: Variables) -> ExecutionOutcome {
        let execution_id = ExecutionId::new();
        let registry = Arc::new(PendingCallRegistry::new());
        let scope = Arc::new(Scope {
            resolver: self.resolver.clone(),
            decider: self.decider.clone(),
            variables: Arc::new(variables),
            registry: registry.clone(),
            incremental: self.config.enabled,
        });

        let errors = ErrorAggregator::new();
        let data = complete_selections(
            scope,
            plan.fields.clone(),
            root,
            ResultPath::root(),
            errors.clone(),
        )
        .await;

        let initial = InitialResult {
            data,
            errors: errors.drain(),
            has_next: registry.is_defer_detected(),
        };
        tracing::debug!(
            %execution_id,
            operation = ?plan.operation_name,
            has_next = initial.has_next,
            errors = initial.errors.len(),
            deferred = registry.pending_count(),
            "initial result ready"
        );

        ExecutionOutcome {
            initial,
            coordinator: IncrementalCoordinator::with_execution_id(
                execution_id,
                registry,
                self.config.clone(),
            ),
        }
    }
}

/// Initial result plus the coordinator owning the deferred calls
pub struct ExecutionOutcome {
    /// The non-deferred part of the response
    pub initial: InitialResult,
    /// Coordinator for everything that was deferred
    pub coordinator: IncrementalCoordinator,
}

impl ExecutionOutcome {
    /// Start deferred delivery
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn start(self) -> (InitialResult, ResultStream<DelayedIncrementalResult>) {
        (self.initial, self.coordinator.start_deferred_calls())
    }
}

/// Per-execution context shared by every field future
struct Scope {
    resolver: Arc<dyn FieldResolver>,
    decider: Arc<dyn DeferDecider>,
    variables: Arc<Variables>,
    registry: Arc<PendingCallRegistry>,
    incremental: bool,
}

impl Scope {
    fn defer_executions(&self, field: &FieldNode) -> Vec<DeferExecution> {
        if !self.incremental {
            return Vec::new();
        }
        self.decider.defer_executions(field, &self.variables)
    }

    fn stream_execution(&self, field: &FieldNode) -> Option<StreamExecution> {
        if !self.incremental || !field.list {
            return None;
        }
        self.decider.stream_execution(field, &self.variables)
    }
}

/// Complete one selection set; `None` means a non-null field was null
fn complete_selections(
    scope: Arc<Scope>,
    selections: Vec<Arc<FieldNode>>,
    source: Value,
    path: ResultPath,
    errors: ErrorAggregator,
) -> BoxFuture<'static, Option<IndexMap<String, Value>>> {
    async move {
        let mut inline = Vec::with_capacity(selections.len());
        let mut deferred: IndexMap<DeferExecution, Vec<Arc<FieldNode>>> = IndexMap::new();
        for field in selections {
            let executions = scope.defer_executions(&field);
            if executions.is_empty() {
                inline.push(field);
                continue;
            }
            for execution in executions {
                deferred.entry(execution).or_default().push(field.clone());
            }
        }
        if !deferred.is_empty() {
            register_deferred(&scope, deferred, &source, &path);
        }

        let results = join_all(inline.iter().map(|field| {
            resolve_field(
                scope.clone(),
                field.clone(),
                source.clone(),
                path.segment(field.result_key()),
                errors.clone(),
            )
        }))
        .await;

        let mut data = IndexMap::with_capacity(inline.len());
        let mut nulled = false;
        for (field, result) in inline.iter().zip(results) {
            let value = match result {
                Ok(value) => {
                    if field.non_null && value.is_null() {
                        errors.add_error(FieldError::non_nullable_field_was_null(
                            path.segment(field.result_key()),
                        ));
                    }
                    value
                }
                Err(error) => {
                    errors.add_error(error);
                    Value::Null
                }
            };
            nulled |= field.non_null && value.is_null();
            data.insert(field.result_key().to_string(), value);
        }
        (!nulled).then_some(data)
    }
    .boxed()
}

/// Build one call per defer execution at this level and register them together
fn register_deferred(
    scope: &Arc<Scope>,
    groups: IndexMap<DeferExecution, Vec<Arc<FieldNode>>>,
    source: &Value,
    path: &ResultPath,
) {
    let mut resolutions: IndexMap<String, SharedResolution> = IndexMap::new();
    let mut calls = Vec::with_capacity(groups.len());

    for (execution, fields) in groups {
        let call_errors = ErrorAggregator::new();
        let mut call = DeferredCall::defer(execution.label, path.clone(), call_errors.clone());

        for field in fields {
            let key = field.result_key().to_string();
            let field_path = path.segment(key.as_str());
            let resolution = resolutions
                .entry(key.clone())
                .or_insert_with(|| {
                    let scope = scope.clone();
                    let field = field.clone();
                    let source = source.clone();
                    let field_path = field_path.clone();
                    async move {
                        let errors = ErrorAggregator::new();
                        let result = resolve_field(scope, field, source, field_path, errors.clone()).await;
                        (result, errors.drain())
                    }
                    .boxed()
                    .shared()
                })
                .clone();

            let errors = call_errors.clone();
            call.push_field(DeferredField::new(key, field_path, field.non_null, async move {
                let (result, field_errors) = resolution.await;
                errors.add_errors(field_errors);
                result
            }));
        }
        calls.push(call);
    }

    tracing::trace!(path = %path, calls = calls.len(), "registering deferred fragments");
    scope.registry.enqueue_all(calls);
}

/// Resolve a field and complete its value
fn resolve_field(
    scope: Arc<Scope>,
    field: Arc<FieldNode>,
    source: Value,
    path: ResultPath,
    errors: ErrorAggregator,
) -> BoxFuture<'static, Result<Value, FieldError>> {
    async move {
        let ctx = FieldContext::new(
            field.clone(),
            path.clone(),
            source,
            scope.variables.clone(),
            errors.clone(),
        );
        let raw = scope
            .resolver
            .resolve(ctx)
            .await
            .map_err(|error| error.or_at(&path))?;
        Ok(complete_value(scope, field, raw, path, errors).await)
    }
    .boxed()
}

fn complete_value(
    scope: Arc<Scope>,
    field: Arc<FieldNode>,
    raw: Value,
    path: ResultPath,
    errors: ErrorAggregator,
) -> BoxFuture<'static, Value> {
    async move {
        if raw.is_null() {
            return Value::Null;
        }
        if !field.list {
            return complete_item(scope, field, raw, path, errors).await;
        }

        let Value::Array(mut items) = raw else {
            errors.add_error(
                FieldError::new(format!("Expected a list for field '{}'", field.name)).at(path),
            );
            return Value::Null;
        };

        if let Some(stream) = scope.stream_execution(&field) {
            let inline_count = stream.initial_count.min(items.len());
            let rest = items.split_off(inline_count);
            register_stream(&scope, &field, stream, rest, &path, inline_count);
        }

        let completed = join_all(items.into_iter().enumerate().map(|(index, item)| {
            complete_item(scope.clone(), field.clone(), item, path.index(index), errors.clone())
        }))
        .await;
        Value::Array(completed)
    }
    .boxed()
}

/// Complete a single (non-list) value of `field`
fn complete_item(
    scope: Arc<Scope>,
    field: Arc<FieldNode>,
    item: Value,
    path: ResultPath,
    errors: ErrorAggregator,
) -> BoxFuture<'static, Value> {
    async move {
        if field.is_leaf() || item.is_null() {
            return item;
        }
        complete_selections(scope, field.selections.clone(), item, path, errors)
            .await
            .map_or(Value::Null, |data| Value::Object(data.into_iter().collect()))
    }
    .boxed()
}

/// One stream call per item past the initial count
fn register_stream(
    scope: &Arc<Scope>,
    field: &Arc<FieldNode>,
    stream: StreamExecution,
    items: Vec<Value>,
    path: &ResultPath,
    first_index: usize,
) {
    let calls: Vec<DeferredCall> = items
        .into_iter()
        .enumerate()
        .map(|(offset, item)| {
            let item_path = path.index(first_index + offset);
            let errors = ErrorAggregator::new();
            let future = complete_item(
                scope.clone(),
                field.clone(),
                item,
                item_path.clone(),
                errors.clone(),
            );
            DeferredCall::stream(stream.label.clone(), item_path.clone(), errors).with_field(
                DeferredField::new(field.result_key(), item_path, false, future.map(Ok)),
            )
        })
        .collect();

    tracing::trace!(path = %path, items = calls.len(), "registering streamed items");
    scope.registry.enqueue_all(calls);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorState;
    use crate::resolver::{PropertyResolver, resolver_fn};
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use trickle_plan::{Condition, DeferDirective, NeverDefer, StreamDirective};

    /// Property lookup with per-field latency and call counting
    fn slow_property(delays: &[(&str, u64)], calls: Arc<AtomicUsize>) -> Arc<dyn FieldResolver> {
        let delays: Arc<HashMap<String, u64>> =
            Arc::new(delays.iter().map(|(k, v)| ((*k).to_string(), *v)).collect());
        resolver_fn(move |ctx: FieldContext| {
            let delay = delays.get(&ctx.field.name).copied();
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if let Some(ms) = delay {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                Ok(ctx.source.get(ctx.field.name.as_str()).cloned().unwrap_or(Value::Null))
            }
        })
    }

    fn hero_root() -> Value {
        json!({
            "hero": {
                "name": "Luke",
                "bio": "Farm boy",
                "ship": {"name": "X-wing", "speed": 100},
                "friends": [{"name": "Han"}, {"name": "Leia"}, {"name": "Chewie"}]
            }
        })
    }

    async fn run(
        executor: &PrimaryExecutor,
        plan: &SelectionPlan,
        variables: Variables,
    ) -> (InitialResult, Vec<DelayedIncrementalResult>) {
        let (initial, stream) = executor.execute(plan, hero_root(), variables).await.start();
        let events: Vec<_> = stream.map(|event| event.unwrap()).collect().await;
        (initial, events)
    }

    #[tokio::test]
    async fn test_execute_without_defer() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(FieldNode::new("name")).select(FieldNode::new("bio")),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert_eq!(
            initial.to_specification(),
            json!({"data": {"hero": {"name": "Luke", "bio": "Farm boy"}}, "hasNext": false})
        );
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_defers_fragment() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero")
                .select(FieldNode::new("name"))
                .select(FieldNode::new("bio").deferred(DeferDirective::labeled("details"))),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PrimaryExecutor::new(slow_property(&[("bio", 50)], calls));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert_eq!(
            initial.to_specification(),
            json!({"data": {"hero": {"name": "Luke"}}, "hasNext": true})
        );
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].to_specification(),
            json!({
                "incremental": [{"data": {"bio": "Farm boy"}, "path": ["hero"], "label": "details"}],
                "hasNext": false
            })
        );
    }

    #[tokio::test]
    async fn test_same_label_merges_into_one_call() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero")
                .select(FieldNode::new("name").deferred(DeferDirective::labeled("d")))
                .select(FieldNode::new("bio").deferred(DeferDirective::labeled("d")))
                .select(
                    FieldNode::new("ship")
                        .deferred(DeferDirective::labeled("other"))
                        .select(FieldNode::new("name")),
                ),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert_eq!(initial.data.unwrap()["hero"], json!({}));
        assert_eq!(events.len(), 2);

        let merged = events
            .iter()
            .map(|e| &e.incremental[0])
            .find(|p| p.label.as_deref() == Some("d"))
            .unwrap();
        let keys: Vec<_> = merged.data().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["name", "bio"]);
    }

    #[tokio::test]
    async fn test_field_shared_between_defers_resolves_once() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(
                FieldNode::new("bio")
                    .deferred(DeferDirective::labeled("first"))
                    .deferred(DeferDirective::labeled("second")),
            ),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PrimaryExecutor::new(slow_property(&[], calls.clone()));
        let (_, events) = run(&executor, &plan, Variables::new()).await;

        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.incremental[0].data().unwrap()["bio"], json!("Farm boy"));
        }
        // "hero" once, "bio" once
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_remaining_items() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(
                FieldNode::new("friends")
                    .list()
                    .streamed(StreamDirective::new(1).with_label("friends"))
                    .select(FieldNode::new("name")),
            ),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert!(initial.has_next);
        assert_eq!(
            initial.data.unwrap()["hero"],
            json!({"friends": [{"name": "Han"}]})
        );

        let mut payloads: Vec<Value> = events
            .iter()
            .map(|e| e.incremental[0].to_specification())
            .collect();
        payloads.sort_by_key(|p| p["path"][2].as_u64());
        assert_eq!(
            payloads,
            vec![
                json!({"items": [{"name": "Leia"}], "path": ["hero", "friends", 1], "label": "friends"}),
                json!({"items": [{"name": "Chewie"}], "path": ["hero", "friends", 2], "label": "friends"}),
            ]
        );
        assert!(!events.last().unwrap().has_next);
    }

    #[tokio::test]
    async fn test_stream_initial_count_covers_list() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(
                FieldNode::new("friends")
                    .list()
                    .streamed(StreamDirective::new(10))
                    .select(FieldNode::new("name")),
            ),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert!(!initial.has_next);
        assert_eq!(initial.data.unwrap()["hero"]["friends"].as_array().unwrap().len(), 3);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_defer_registers_during_invocation() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(
                FieldNode::new("ship")
                    .deferred(DeferDirective::labeled("outer"))
                    .select(FieldNode::new("name"))
                    .select(FieldNode::new("speed").deferred(DeferDirective::labeled("inner"))),
            ),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));
        let executor = PrimaryExecutor::new(slow_property(&[("speed", 20)], calls));
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert!(initial.has_next);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].to_specification(),
            json!({
                "incremental": [{"data": {"ship": {"name": "X-wing"}}, "path": ["hero"], "label": "outer"}],
                "hasNext": true
            })
        );
        assert_eq!(
            events[1].to_specification(),
            json!({
                "incremental": [{"data": {"speed": 100}, "path": ["hero", "ship"], "label": "inner"}],
                "hasNext": false
            })
        );
    }

    #[tokio::test]
    async fn test_inline_error_and_non_null_bubbling() {
        let resolver = resolver_fn(|ctx: FieldContext| async move {
            match ctx.field.name.as_str() {
                "broken" => Err(FieldError::new("broken resolver")),
                "missing" => Ok(Value::Null),
                name => Ok(ctx.source.get(name).cloned().unwrap_or(Value::Null)),
            }
        });
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero")
                .select(FieldNode::new("name"))
                .select(FieldNode::new("broken")),
            FieldNode::new("hero")
                .with_alias("again")
                .select(FieldNode::new("missing").non_null()),
        ]);
        let executor = PrimaryExecutor::new(resolver);
        let outcome = executor.execute(&plan, hero_root(), Variables::new()).await;
        let initial = outcome.initial;

        let data = initial.data.unwrap();
        assert_eq!(data["hero"], json!({"name": "Luke", "broken": null}));
        assert_eq!(data["again"], Value::Null);
        assert_eq!(initial.errors.len(), 2);
        assert_eq!(initial.errors[0].path, ResultPath::root().segment("hero").segment("broken"));
        assert_eq!(initial.errors[1].path, ResultPath::root().segment("again").segment("missing"));
        assert!(initial.errors[1].message.contains("non-nullable"));
    }

    #[tokio::test]
    async fn test_non_null_root_nulls_data() {
        let plan = SelectionPlan::new(vec![FieldNode::new("nothing").non_null()]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));
        let outcome = executor.execute(&plan, hero_root(), Variables::new()).await;

        assert!(outcome.initial.data.is_none());
        assert_eq!(outcome.initial.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_config_resolves_inline() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero")
                .select(FieldNode::new("bio").deferred(DeferDirective::labeled("details")))
                .select(
                    FieldNode::new("friends")
                        .list()
                        .streamed(StreamDirective::new(0))
                        .select(FieldNode::new("name")),
                ),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver))
            .with_config(IncrementalConfig::new().with_enabled(false));
        assert!(!executor.config().enabled);

        let outcome = executor.execute(&plan, hero_root(), Variables::new()).await;
        assert!(!outcome.initial.has_next);
        let hero = &outcome.initial.data.as_ref().unwrap()["hero"];
        assert_eq!(hero["bio"], json!("Farm boy"));
        assert_eq!(hero["friends"].as_array().unwrap().len(), 3);

        let handle = outcome.coordinator.handle();
        let (_, stream) = outcome.start();
        assert!(stream.collect::<Vec<_>>().await.is_empty());
        assert_eq!(handle.state(), CoordinatorState::Done);
    }

    #[tokio::test]
    async fn test_never_defer_decider() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(FieldNode::new("bio").deferred(DeferDirective::new())),
        ]);
        let executor =
            PrimaryExecutor::new(Arc::new(PropertyResolver)).with_decider(Arc::new(NeverDefer));
        let outcome = executor.execute(&plan, hero_root(), Variables::new()).await;

        assert!(!outcome.initial.has_next);
        assert_eq!(outcome.initial.data.unwrap()["hero"]["bio"], json!("Farm boy"));
    }

    #[tokio::test]
    async fn test_defer_condition_variable() {
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero").select(
                FieldNode::new("bio").deferred(
                    DeferDirective::new().with_condition(Condition::Variable("deferBio".to_string())),
                ),
            ),
        ]);
        let executor = PrimaryExecutor::new(Arc::new(PropertyResolver));

        let mut variables = Variables::new();
        variables.insert("deferBio".to_string(), json!(false));
        let (initial, events) = run(&executor, &plan, variables).await;
        assert!(!initial.has_next);
        assert!(events.is_empty());

        let mut variables = Variables::new();
        variables.insert("deferBio".to_string(), json!(true));
        let (initial, events) = run(&executor, &plan, variables).await;
        assert!(initial.has_next);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_field_error_stays_in_payload() {
        let resolver = resolver_fn(|ctx: FieldContext| async move {
            match ctx.field.name.as_str() {
                "bio" => Err(FieldError::new("bio unavailable")),
                name => Ok(ctx.source.get(name).cloned().unwrap_or(Value::Null)),
            }
        });
        let plan = SelectionPlan::new(vec![
            FieldNode::new("hero")
                .select(FieldNode::new("name"))
                .select(FieldNode::new("bio").deferred(DeferDirective::new())),
        ]);
        let executor = PrimaryExecutor::new(resolver);
        let (initial, events) = run(&executor, &plan, Variables::new()).await;

        assert!(initial.errors.is_empty());
        let payload = &events[0].incremental[0];
        assert_eq!(payload.data().unwrap()["bio"], Value::Null);
        assert_eq!(payload.errors.len(), 1);
        assert_eq!(payload.errors[0].path, ResultPath::root().segment("hero").segment("bio"));
    }
}
