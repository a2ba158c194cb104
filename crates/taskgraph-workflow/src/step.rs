//! The step contract: identity, dependencies, timeout, retry policy,
//! optional condition, and the asynchronous unit of work itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskgraph_types::WorkflowError;

use crate::context::ExecutionContext;

/// A predicate evaluated against the execution context just before a step
/// would be dispatched. `false` settles the step as `Skipped` without
/// invoking `execute`.
#[derive(Clone)]
pub struct Condition {
    name: &'static str,
    predicate: Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>,
}

impl Condition {
    pub fn new(
        name: &'static str,
        predicate: impl Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        (self.predicate)(ctx)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition").field("name", &self.name).finish()
    }
}

/// `min_output_words(step_name, n)` returns true iff `step_outputs[step_name]`
/// exists, stringifies non-empty, and contains at least `n`
/// whitespace-separated tokens.
pub fn min_output_words(step_name: impl Into<String>, n: usize) -> Condition {
    let step_name = step_name.into();
    Condition::new("min_output_words", move |ctx| {
        let Some(output) = ctx.step_outputs.get(&step_name) else {
            return false;
        };
        let text = match output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        text.split_whitespace().count() >= n
    })
}

/// `step_completed(step_name)` returns true iff the named step produced an
/// output (i.e. it completed rather than being skipped or failed).
pub fn step_completed(step_name: impl Into<String>) -> Condition {
    let step_name = step_name.into();
    Condition::new("step_completed", move |ctx| {
        ctx.step_outputs.contains_key(&step_name)
    })
}

/// `step_output_equals(step_name, value)` returns true iff the named step's
/// output is present and equal to `value`.
pub fn step_output_equals(step_name: impl Into<String>, value: serde_json::Value) -> Condition {
    let step_name = step_name.into();
    Condition::new("step_output_equals", move |ctx| {
        ctx.step_outputs.get(&step_name) == Some(&value)
    })
}

/// Decides, given an error, whether another attempt is warranted.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &WorkflowError) -> bool;
}

/// Substring-based classifier: a non-retryable list is checked first, then
/// a retryable list; anything matching neither is treated as non-retryable.
pub struct DefaultRetryClassifier {
    non_retryable: Vec<&'static str>,
    retryable: Vec<&'static str>,
}

impl Default for DefaultRetryClassifier {
    fn default() -> Self {
        Self {
            non_retryable: vec![
                "authentication",
                "permission",
                "not found",
                "invalid",
                "400",
                "401",
                "403",
                "404",
            ],
            retryable: vec![
                "timeout",
                "connection",
                "rate limit",
                "429",
                "500",
                "502",
                "503",
                "504",
                "temporary",
                "transient",
            ],
        }
    }
}

impl RetryClassifier for DefaultRetryClassifier {
    fn is_retryable(&self, error: &WorkflowError) -> bool {
        // Structured kinds are authoritative where they apply; timeouts are
        // always retryable regardless of message text.
        if error.always_retryable() {
            return true;
        }

        let message = error.to_string().to_lowercase();

        if self.non_retryable.iter().any(|p| message.contains(p)) {
            return false;
        }
        if self.retryable.iter().any(|p| message.contains(p)) {
            return true;
        }
        false
    }
}

/// The abstract unit of work dispatched by the executor.
///
/// Steps are held as `Arc<dyn Step>` because a single workflow's step list
/// is heterogeneous: different concrete types occupy different slots of
/// the same `Vec`.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique within the workflow that contains this step.
    fn name(&self) -> &str;

    /// Names of steps that must reach `Completed` before this one is ready.
    fn dependencies(&self) -> &[String];

    /// Bounds a single attempt, not the whole retry lifecycle.
    fn timeout(&self) -> Duration;

    /// Total attempts allowed, first try included (>= 1).
    fn max_attempts(&self) -> u32;

    /// Evaluated just before dispatch; `None` always runs.
    fn condition(&self) -> Option<&Condition> {
        None
    }

    /// Decides whether a failed attempt's error warrants another attempt.
    fn retry_classifier(&self) -> &dyn RetryClassifier;

    /// Perform the work. Called at most `max_attempts()` times per run.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<serde_json::Value, WorkflowError>;

    /// Fails with `MissingDependency` if a declared dependency is absent
    /// from `ctx.step_outputs` (e.g. it was skipped).
    fn validate_dependencies(&self, ctx: &ExecutionContext) -> Result<(), WorkflowError> {
        for dep in self.dependencies() {
            if !ctx.step_outputs.contains_key(dep) {
                return Err(WorkflowError::MissingDependency {
                    step: self.name().to_string(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// Returns a dependency's output, or `MissingDependency` if absent.
    fn get_dependency_output<'a>(
        &self,
        ctx: &'a ExecutionContext,
        step_name: &str,
    ) -> Result<&'a serde_json::Value, WorkflowError> {
        ctx.step_outputs
            .get(step_name)
            .ok_or_else(|| WorkflowError::MissingDependency {
                step: self.name().to_string(),
                dependency: step_name.to_string(),
            })
    }
}

/// A reusable, builder-constructed [`Step`] wrapping an async closure.
///
/// Most steps don't need a bespoke type; `ClosureStep` lets callers attach
/// an `execute` function directly, with an open signature rather than a
/// closed action enum.
pub struct ClosureStep<F> {
    id: String,
    name: String,
    dependencies: Vec<String>,
    timeout: Duration,
    max_attempts: u32,
    condition: Option<Condition>,
    classifier: Box<dyn RetryClassifier>,
    execute_fn: F,
}

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

impl<F> ClosureStep<F>
where
    F: for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>>
        + Send
        + Sync,
{
    pub fn new(name: impl Into<String>, execute_fn: F) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            dependencies: Vec::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 1,
            condition: None,
            classifier: Box::new(DefaultRetryClassifier::default()),
            execute_fn,
        }
    }

    /// Overrides the auto-generated execution-instance id (distinct from
    /// `name`, which is what dependency resolution keys on). Useful for
    /// callers that want to correlate a step with an id minted elsewhere
    /// (e.g. a tracing span or an external job id).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The execution-instance id, distinct from `name`. Not used by the
    /// executor for dependency resolution or `step_results` keys; those
    /// key on `name`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        assert!(max_attempts >= 1, "max_attempts must be at least 1");
        self.max_attempts = max_attempts;
        self
    }

    /// Alias for `with_max_attempts`.
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.with_max_attempts(max_retries)
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retry_classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }
}

#[async_trait]
impl<F> Step for ClosureStep<F>
where
    F: for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    fn retry_classifier(&self) -> &dyn RetryClassifier {
        self.classifier.as_ref()
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<serde_json::Value, WorkflowError> {
        (self.execute_fn)(ctx).await
    }
}

/// Helper for constructing the `BoxFuture` a [`ClosureStep`] expects.
pub fn boxed_execute<'a>(
    fut: impl std::future::Future<Output = Result<serde_json::Value, WorkflowError>> + Send + 'a,
) -> BoxFuture<'a, Result<serde_json::Value, WorkflowError>> {
    Box::pin(fut)
}

/// Convenience constructor for a `STEP_EXECUTION` error from within a step.
pub fn step_execution_error(step_name: impl Into<String>, message: impl Into<String>) -> WorkflowError {
    WorkflowError::StepExecution {
        step: step_name.into(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskgraph_types::ErrorKind;

    fn ctx_with(outputs: Vec<(&str, serde_json::Value)>) -> ExecutionContext {
        ExecutionContext {
            input_data: HashMap::new(),
            step_outputs: outputs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn min_output_words_false_when_missing() {
        let cond = min_output_words("a", 3);
        let ctx = ctx_with(vec![]);
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn min_output_words_counts_whitespace_tokens() {
        let cond = min_output_words("a", 3);
        let ctx = ctx_with(vec![("a", serde_json::json!("one two"))]);
        assert!(!cond.evaluate(&ctx));

        let ctx = ctx_with(vec![("a", serde_json::json!("one two three"))]);
        assert!(cond.evaluate(&ctx));
    }

    #[test]
    fn min_output_words_false_on_empty_string() {
        let cond = min_output_words("a", 1);
        let ctx = ctx_with(vec![("a", serde_json::json!(""))]);
        assert!(!cond.evaluate(&ctx));
    }

    #[test]
    fn step_completed_checks_presence() {
        let cond = step_completed("a");
        assert!(!cond.evaluate(&ctx_with(vec![])));
        assert!(cond.evaluate(&ctx_with(vec![("a", serde_json::json!(1))])));
    }

    #[test]
    fn default_classifier_checks_non_retryable_first() {
        let classifier = DefaultRetryClassifier::default();
        let err = step_execution_error("s", "Invalid input: 404 not found");
        // Contains both a retryable-looking "404" and non-retryable "not found";
        // non-retryable wins because it is checked first.
        assert!(!classifier.is_retryable(&err));
    }

    #[test]
    fn default_classifier_retries_transient_errors() {
        let classifier = DefaultRetryClassifier::default();
        let err = step_execution_error("s", "Temporary failure, please retry");
        assert!(classifier.is_retryable(&err));
    }

    #[test]
    fn default_classifier_defaults_to_non_retryable() {
        let classifier = DefaultRetryClassifier::default();
        let err = step_execution_error("s", "unexpected kaboom");
        assert!(!classifier.is_retryable(&err));
    }

    #[test]
    fn timeouts_are_always_retryable_regardless_of_message() {
        let classifier = DefaultRetryClassifier::default();
        let err = WorkflowError::Timeout {
            step: "s".to_string(),
            timeout_secs: 1,
        };
        assert!(classifier.is_retryable(&err));
    }

    #[test]
    fn each_closure_step_gets_a_distinct_auto_generated_id_unless_overridden() {
        let a = ClosureStep::new("a", |_ctx| boxed_execute(async { Ok(serde_json::Value::Null) }));
        let b = ClosureStep::new("a", |_ctx| boxed_execute(async { Ok(serde_json::Value::Null) }));
        assert_ne!(a.id(), b.id());

        let c = ClosureStep::new("a", |_ctx| boxed_execute(async { Ok(serde_json::Value::Null) }))
            .with_id("custom-id");
        assert_eq!(c.id(), "custom-id");
    }

    #[tokio::test]
    async fn closure_step_executes_and_validates_dependencies() {
        let step = ClosureStep::new("b", |ctx: &ExecutionContext| {
            boxed_execute(async move {
                Ok(ctx.step_outputs.get("a").cloned().unwrap_or(serde_json::json!(null)))
            })
        })
        .with_dependency("a");

        let ctx = ctx_with(vec![("a", serde_json::json!("value"))]);
        assert!(step.validate_dependencies(&ctx).is_ok());
        let out = step.execute(&ctx).await.unwrap();
        assert_eq!(out, serde_json::json!("value"));

        let empty_ctx = ctx_with(vec![]);
        let err = step.validate_dependencies(&empty_ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingDependency);
    }
}
