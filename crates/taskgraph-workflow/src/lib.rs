//! DAG workflow execution: dependency validation, ready-set scheduling with
//! bounded parallelism, per-step timeout and retry with backoff, conditional
//! skipping, optional progress events, and resumable persistence.

pub mod context;
pub mod dag;
pub mod executor;
pub mod progress;
pub mod state_store;
pub mod step;

pub use context::ExecutionContext;
pub use dag::{build_dependency_graph, build_dependency_graph_with_external, DependencyGraph};
pub use executor::WorkflowExecutor;
pub use progress::ProgressSink;
pub use state_store::{InMemoryStateStore, StateStore};
pub use step::{
    boxed_execute, min_output_words, step_completed, step_execution_error, step_output_equals,
    ClosureStep, Condition, DefaultRetryClassifier, RetryClassifier, Step,
};
