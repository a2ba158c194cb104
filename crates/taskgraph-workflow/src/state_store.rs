//! Pluggable persistence for `WorkflowState`, and a default in-memory
//! implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use taskgraph_types::WorkflowState;

/// Contract for durable workflow-state persistence.
///
/// `save_state` is called at least once, at workflow termination;
/// implementations that persist intermediate snapshots must serialize
/// their own concurrent access.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Durably record `state`, overwriting any prior record for the same id.
    async fn save_state(&self, state: WorkflowState);

    /// Load the record for `workflow_id`, or `None` if never saved.
    async fn load_state(&self, workflow_id: &str) -> Option<WorkflowState>;

    /// Idempotent removal.
    async fn delete_state(&self, workflow_id: &str);

    /// All known workflow ids.
    async fn list_workflows(&self) -> Vec<String>;
}

/// In-memory `StateStore` with full-overwrite semantics, suitable for
/// tests and single-process callers that don't need durability across
/// restarts.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every stored state. Not part of the `StateStore` contract;
    /// exists for test fixtures that want a clean slate between cases.
    pub async fn clear(&self) {
        self.states.write().await.clear();
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_state(&self, state: WorkflowState) {
        self.states.write().await.insert(state.workflow_id.clone(), state);
    }

    async fn load_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.states.read().await.get(workflow_id).cloned()
    }

    async fn delete_state(&self, workflow_id: &str) {
        self.states.write().await.remove(workflow_id);
    }

    async fn list_workflows(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryStateStore::new();
        let state = WorkflowState::new("wf1", StdHashMap::new());
        store.save_state(state).await;

        let loaded = store.load_state("wf1").await.unwrap();
        assert_eq!(loaded.workflow_id, "wf1");
    }

    #[tokio::test]
    async fn save_overwrites_prior_record() {
        let store = InMemoryStateStore::new();
        let mut state = WorkflowState::new("wf1", StdHashMap::new());
        store.save_state(state.clone()).await;

        state.metadata.insert("k".to_string(), serde_json::json!("v"));
        store.save_state(state).await;

        let loaded = store.load_state("wf1").await.unwrap();
        assert_eq!(loaded.metadata.get("k"), Some(&serde_json::json!("v")));
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = InMemoryStateStore::new();
        assert!(store.load_state("missing").await.is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStateStore::new();
        store.delete_state("missing").await;
        let state = WorkflowState::new("wf1", StdHashMap::new());
        store.save_state(state).await;
        store.delete_state("wf1").await;
        store.delete_state("wf1").await;
        assert!(store.load_state("wf1").await.is_none());
    }

    #[tokio::test]
    async fn list_workflows_reflects_saved_ids() {
        let store = InMemoryStateStore::new();
        store.save_state(WorkflowState::new("wf1", StdHashMap::new())).await;
        store.save_state(WorkflowState::new("wf2", StdHashMap::new())).await;

        let mut ids = store.list_workflows().await;
        ids.sort();
        assert_eq!(ids, vec!["wf1".to_string(), "wf2".to_string()]);
    }
}
