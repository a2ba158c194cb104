//! Ready-set scheduling, per-step timeout/retry, conditional skipping, and
//! resumable persistence. The engine that turns a step list into a
//! [`WorkflowState`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use taskgraph_types::{
    ErrorKind, StepErrorInfo, StepResult, StepStatus, WorkflowError, WorkflowState, WorkflowStatus,
};

use crate::context::ExecutionContext;
use crate::dag::build_dependency_graph_with_external;
use crate::progress::ProgressSink;
use crate::state_store::StateStore;
use crate::step::Step;

const BASE_BACKOFF_MS: f64 = 100.0;
const MAX_BACKOFF_MS: f64 = 5000.0;
const JITTER_FRACTION: f64 = 0.25;
const DEFAULT_MAX_PARALLEL_STEPS: usize = 5;

/// `delay = min(100ms * 2^attempt, 5s)`, jittered by up to 25% in either
/// direction. `attempt` is the number of attempts already made (the `k`-th
/// retry waits before attempt `k+1`).
fn backoff_delay(attempt: u32) -> Duration {
    let base = (BASE_BACKOFF_MS * 2f64.powi(attempt as i32)).min(MAX_BACKOFF_MS);
    let jitter_range = base * JITTER_FRACTION;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    let millis = (base + jitter).max(0.0);
    Duration::from_secs_f64(millis / 1000.0)
}

enum Attempt {
    Success(Value),
    Failure(WorkflowError),
    Cancelled,
}

/// Runs one step's full attempt cycle: timeout per attempt, retry with
/// backoff while the classifier says so, up to `max_attempts`.
async fn run_step_lifecycle(
    step: Arc<dyn Step>,
    ctx: ExecutionContext,
    token: CancellationToken,
) -> (String, StepResult) {
    let name = step.name().to_string();
    let started_at = Utc::now();
    let clock = Instant::now();

    let mut attempts = 0u32;
    let mut last_error: Option<WorkflowError> = None;

    loop {
        attempts += 1;
        tracing::debug!(step = %name, attempt = attempts, "executing step attempt");

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Attempt::Cancelled,
            res = tokio::time::timeout(step.timeout(), step.execute(&ctx)) => match res {
                Ok(Ok(output)) => Attempt::Success(output),
                Ok(Err(err)) => Attempt::Failure(err),
                Err(_elapsed) => Attempt::Failure(WorkflowError::Timeout {
                    step: name.clone(),
                    timeout_secs: step.timeout().as_secs(),
                }),
            },
        };

        match outcome {
            Attempt::Success(output) => {
                let completed_at = Utc::now();
                let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
                return (
                    name,
                    StepResult::completed(output, attempts, duration_ms, started_at, completed_at),
                );
            }
            Attempt::Cancelled => {
                let completed_at = Utc::now();
                let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
                let err = WorkflowError::Cancelled { step: name.clone() };
                return (
                    name,
                    StepResult::failed(StepErrorInfo::from(&err), attempts, duration_ms, started_at, completed_at),
                );
            }
            Attempt::Failure(err) => {
                let retryable = err.kind() == ErrorKind::Timeout || step.retry_classifier().is_retryable(&err);
                let has_budget = attempts < step.max_attempts();
                last_error = Some(err);

                if retryable && has_budget {
                    let delay = backoff_delay(attempts);
                    tracing::debug!(step = %name, attempt = attempts, delay_ms = delay.as_millis() as u64, "backing off before retry");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            let completed_at = Utc::now();
                            let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
                            let err = WorkflowError::Cancelled { step: name.clone() };
                            return (
                                name,
                                StepResult::failed(StepErrorInfo::from(&err), attempts, duration_ms, started_at, completed_at),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }

                break;
            }
        }
    }

    let completed_at = Utc::now();
    let duration_ms = clock.elapsed().as_secs_f64() * 1000.0;
    let err = last_error.expect("failure branch always records an error");
    (
        name,
        StepResult::failed(StepErrorInfo::from(&err), attempts, duration_ms, started_at, completed_at),
    )
}

/// Orchestrates one or many workflow runs against a shared [`StateStore`].
///
/// A single executor instance is safe to reuse across unrelated workflow
/// ids: it holds no per-run state itself, only the store, the dispatch
/// width, and the progress sink.
pub struct WorkflowExecutor {
    state_store: Arc<dyn StateStore>,
    max_parallel_steps: usize,
    progress: ProgressSink,
}

impl WorkflowExecutor {
    pub fn new(state_store: Arc<dyn StateStore>) -> Self {
        Self {
            state_store,
            max_parallel_steps: DEFAULT_MAX_PARALLEL_STEPS,
            progress: ProgressSink::new(false),
        }
    }

    /// Upper bound on steps dispatched concurrently within a single wave.
    pub fn with_max_parallel_steps(mut self, max_parallel_steps: usize) -> Self {
        assert!(max_parallel_steps >= 1, "max_parallel_steps must be at least 1");
        self.max_parallel_steps = max_parallel_steps;
        self
    }

    pub fn with_progress_events(mut self, enabled: bool) -> Self {
        self.progress = ProgressSink::new(enabled);
        self
    }

    pub async fn progress_events(&self) -> Vec<taskgraph_types::ProgressEvent> {
        self.progress.snapshot().await
    }

    pub async fn clear_progress_events(&self) {
        self.progress.clear().await;
    }

    /// Runs `steps` to completion under a fresh `workflow_id`.
    pub async fn execute_workflow(
        &self,
        workflow_id: impl Into<String>,
        steps: Vec<Arc<dyn Step>>,
        input_data: HashMap<String, Value>,
    ) -> Result<WorkflowState, WorkflowError> {
        self.execute_workflow_with_cancellation(workflow_id, steps, input_data, CancellationToken::new())
            .await
    }

    /// As [`Self::execute_workflow`], but `token.cancel()` settles every step
    /// still in flight as `Failed` with `ErrorKind::Cancelled` and stops
    /// dispatching new waves.
    pub async fn execute_workflow_with_cancellation(
        &self,
        workflow_id: impl Into<String>,
        steps: Vec<Arc<dyn Step>>,
        input_data: HashMap<String, Value>,
        token: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let workflow_id = workflow_id.into();
        let state = WorkflowState::new(workflow_id.clone(), input_data.clone());
        self.run(workflow_id, steps, input_data, state, HashSet::new(), token).await
    }

    /// Picks a previously persisted, non-`Completed` run back up: steps that
    /// already reached `Completed` are dropped from `steps` and their
    /// outputs remain visible to the rest; everything else (never attempted,
    /// `Failed`, or `Skipped`) runs fresh under the same `workflow_id`.
    pub async fn resume_workflow(
        &self,
        workflow_id: impl Into<String>,
        steps: Vec<Arc<dyn Step>>,
    ) -> Result<WorkflowState, WorkflowError> {
        self.resume_workflow_with_cancellation(workflow_id, steps, CancellationToken::new())
            .await
    }

    pub async fn resume_workflow_with_cancellation(
        &self,
        workflow_id: impl Into<String>,
        steps: Vec<Arc<dyn Step>>,
        token: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let workflow_id = workflow_id.into();
        let prior = self
            .state_store
            .load_state(&workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound {
                workflow_id: workflow_id.clone(),
            })?;

        if prior.status == WorkflowStatus::Completed {
            return Err(WorkflowError::AlreadyComplete { workflow_id });
        }

        let completed_names: HashSet<String> = prior.completed_steps().into_iter().collect();
        let remaining: Vec<Arc<dyn Step>> = steps.into_iter().filter(|s| !completed_names.contains(s.name())).collect();

        let input_data = prior.input_data.clone();
        let mut seed = prior;
        seed.status = WorkflowStatus::Running;
        seed.end_time = None;

        if remaining.is_empty() {
            seed.status = WorkflowStatus::Completed;
            seed.end_time = Some(Utc::now());
            self.state_store.save_state(seed.clone()).await;
            return Ok(seed);
        }

        self.run(workflow_id, remaining, input_data, seed, completed_names, token).await
    }

    /// Shared core for both entry points: validate the DAG, then dispatch
    /// wave by wave until every step has settled.
    async fn run(
        &self,
        workflow_id: String,
        steps: Vec<Arc<dyn Step>>,
        input_data: HashMap<String, Value>,
        mut state: WorkflowState,
        external_completed: HashSet<String>,
        token: CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        if let Err(err) = build_dependency_graph_with_external(&steps, &external_completed) {
            return self.abort_run(&mut state, err).await;
        }

        let step_map: HashMap<String, Arc<dyn Step>> =
            steps.iter().map(|s| (s.name().to_string(), s.clone())).collect();
        let mut pending: Vec<String> = steps.iter().map(|s| s.name().to_string()).collect();
        let mut completed: HashSet<String> = external_completed;
        let mut skipped: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();

        while !pending.is_empty() {
            if token.is_cancelled() {
                let err = WorkflowError::Cancelled {
                    step: pending.join(", "),
                };
                return self.abort_run(&mut state, err).await;
            }

            let ready: Vec<String> = pending
                .iter()
                .filter(|name| {
                    let step = &step_map[*name];
                    step.dependencies().iter().all(|d| completed.contains(d) || skipped.contains(d))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                let err = WorkflowError::UnmetDependencies {
                    remaining: pending.clone(),
                };
                return self.abort_run(&mut state, err).await;
            }

            let selected: Vec<String> = ready.into_iter().take(self.max_parallel_steps).collect();
            let selected_set: HashSet<&str> = selected.iter().map(|s| s.as_str()).collect();
            pending.retain(|p| !selected_set.contains(p.as_str()));

            let step_outputs: HashMap<String, Value> = completed
                .iter()
                .filter_map(|name| {
                    state
                        .step_results
                        .get(name)
                        .and_then(|r| r.output.clone())
                        .map(|output| (name.clone(), output))
                })
                .collect();
            let ctx = ExecutionContext::new(input_data.clone(), step_outputs);

            let mut dispatched = Vec::new();
            let mut handles = Vec::new();

            for name in &selected {
                let step = step_map[name].clone();

                if let Some(condition) = step.condition() {
                    if !condition.evaluate(&ctx) {
                        let now = Utc::now();
                        tracing::debug!(step = %name, condition = condition.name(), "step skipped: condition not met");
                        state.step_results.insert(name.clone(), StepResult::skipped(now));
                        skipped.insert(name.clone());
                        self.progress.emit_step_complete(&workflow_id, name, StepStatus::Skipped).await;
                        continue;
                    }
                }

                tracing::info!(step = %name, "dispatching step");
                self.progress.emit_step_start(&workflow_id, name).await;

                let step_clone = step.clone();
                let ctx_clone = ctx.clone();
                let token_clone = token.clone();
                dispatched.push(name.clone());
                handles.push(tokio::spawn(async move {
                    run_step_lifecycle(step_clone, ctx_clone, token_clone).await
                }));
            }

            let joined = join_all(handles).await;
            for (name, outcome) in dispatched.into_iter().zip(joined) {
                let result = match outcome {
                    Ok((_, result)) => result,
                    Err(join_err) => {
                        let now = Utc::now();
                        let err = WorkflowError::StepExecution {
                            step: name.clone(),
                            message: format!("step task did not complete: {join_err}"),
                        };
                        StepResult::failed(StepErrorInfo::from(&err), 0, 0.0, now, now)
                    }
                };

                match result.status {
                    StepStatus::Completed => {
                        completed.insert(name.clone());
                    }
                    StepStatus::Failed => {
                        failed.insert(name.clone());
                    }
                    _ => {}
                }

                self.progress.emit_step_complete(&workflow_id, &name, result.status).await;
                state.step_results.insert(name, result);
            }
        }

        if !failed.is_empty() {
            let mut failed_steps: Vec<String> = failed.into_iter().collect();
            failed_steps.sort();
            let err = WorkflowError::WorkflowFailed { failed_steps };
            state.status = WorkflowStatus::Failed;
            state.metadata.insert("error".to_string(), Value::String(err.to_string()));
            state.end_time = Some(Utc::now());
            self.state_store.save_state(state.clone()).await;
            return Err(err);
        }

        state.status = WorkflowStatus::Completed;
        state.end_time = Some(Utc::now());
        self.state_store.save_state(state.clone()).await;
        Ok(state)
    }

    async fn abort_run(
        &self,
        state: &mut WorkflowState,
        err: WorkflowError,
    ) -> Result<WorkflowState, WorkflowError> {
        tracing::warn!(workflow_id = %state.workflow_id, error = %err, "workflow aborted");
        state.status = WorkflowStatus::Failed;
        state.metadata.insert("error".to_string(), Value::String(err.to_string()));
        state.end_time = Some(Utc::now());
        self.state_store.save_state(state.clone()).await;
        Err(err)
    }
}
