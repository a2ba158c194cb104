//! Status enums for steps and workflows.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single step within one workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet dispatched.
    Pending,
    /// An attempt is currently in flight.
    Running,
    /// Finished with output, no further attempts needed.
    Completed,
    /// Exhausted its attempts (or hit a non-retryable error) without success.
    Failed,
    /// Settled without executing because its condition evaluated false.
    Skipped,
}

/// Lifecycle status of an entire workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_round_trips_through_json() {
        let s = StepStatus::Skipped;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"skipped\"");
        let back: StepStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StepStatus::Skipped);
    }

    #[test]
    fn workflow_status_round_trips_through_json() {
        let s = WorkflowStatus::Cancelled;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let back: WorkflowStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkflowStatus::Cancelled);
    }
}
