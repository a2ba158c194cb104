//! Optional in-memory log of workflow lifecycle events.

use tokio::sync::Mutex;

use taskgraph_types::{ProgressEvent, StepStatus};

/// Appends a `ProgressEvent` on every step_start and step_complete when
/// enabled; a disabled sink costs a branch, not an allocation.
pub struct ProgressSink {
    enabled: bool,
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn emit_step_start(&self, workflow_id: &str, step_name: &str) {
        if !self.enabled {
            return;
        }
        let event = ProgressEvent::step_scoped(
            workflow_id,
            "step_start",
            step_name,
            StepStatus::Running,
        );
        self.events.lock().await.push(event);
    }

    pub async fn emit_step_complete(&self, workflow_id: &str, step_name: &str, status: StepStatus) {
        if !self.enabled {
            return;
        }
        let event = ProgressEvent::step_scoped(workflow_id, "step_complete", step_name, status);
        self.events.lock().await.push(event);
    }

    /// Defensive copy of every event retained so far.
    pub async fn snapshot(&self) -> Vec<ProgressEvent> {
        self.events.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_retains_nothing() {
        let sink = ProgressSink::new(false);
        sink.emit_step_start("wf", "a").await;
        sink.emit_step_complete("wf", "a", StepStatus::Completed).await;
        assert!(sink.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn enabled_sink_records_start_then_complete() {
        let sink = ProgressSink::new(true);
        sink.emit_step_start("wf", "a").await;
        sink.emit_step_complete("wf", "a", StepStatus::Completed).await;

        let events = sink.snapshot().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "step_start");
        assert_eq!(events[1].event_type, "step_complete");
    }

    #[tokio::test]
    async fn clear_empties_the_log() {
        let sink = ProgressSink::new(true);
        sink.emit_step_start("wf", "a").await;
        sink.clear().await;
        assert!(sink.snapshot().await.is_empty());
    }
}
