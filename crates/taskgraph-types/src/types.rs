//! Records exchanged between the executor, the state store, and callers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StepErrorInfo;
use crate::status::{StepStatus, WorkflowStatus};

/// Outcome of one step's full attempt cycle (all retries included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    /// Present only when `status == Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Present only when `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorInfo>,
    /// Wall time of the full attempt cycle, in milliseconds.
    #[serde(default)]
    pub duration_ms: f64,
    /// Attempts actually performed. 0 is valid only for `Skipped`.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn completed(
        output: serde_json::Value,
        attempts: u32,
        duration_ms: f64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            duration_ms,
            attempts,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
        }
    }

    pub fn failed(
        error: StepErrorInfo,
        attempts: u32,
        duration_ms: f64,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            attempts,
            started_at: Some(started_at),
            completed_at: Some(completed_at),
        }
    }

    pub fn skipped(completed_at: DateTime<Utc>) -> Self {
        Self {
            status: StepStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0.0,
            attempts: 0,
            started_at: Some(completed_at),
            completed_at: Some(completed_at),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// The authoritative record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub step_results: HashMap<String, StepResult>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new(workflow_id: impl Into<String>, input_data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Running,
            step_results: HashMap::new(),
            start_time: Utc::now(),
            end_time: None,
            input_data,
            metadata: HashMap::new(),
        }
    }

    /// Duration of the run in milliseconds, or 0 while still running.
    pub fn duration_ms(&self) -> f64 {
        match self.end_time {
            Some(end) => (end - self.start_time).num_milliseconds() as f64,
            None => 0.0,
        }
    }

    pub fn completed_steps(&self) -> Vec<String> {
        self.step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Completed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn failed_steps(&self) -> Vec<String> {
        self.step_results
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Failed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn step_output(&self, step_name: &str) -> Option<&serde_json::Value> {
        self.step_results.get(step_name)?.output.as_ref()
    }
}

/// One lifecycle event, retained only when progress events are enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub workflow_id: String,
    /// e.g. "step_start", "step_complete".
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_status: Option<StepStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ProgressEvent {
    pub fn step_scoped(
        workflow_id: impl Into<String>,
        event_type: impl Into<String>,
        step_name: impl Into<String>,
        step_status: StepStatus,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            event_type: event_type.into(),
            step_name: Some(step_name.into()),
            step_status: Some(step_status),
            message: None,
            metadata: HashMap::new(),
        }
    }
}
