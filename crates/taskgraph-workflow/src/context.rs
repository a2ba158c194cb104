//! The read-only view delivered to a step at dispatch time.

use std::collections::HashMap;

/// A snapshot assembled fresh for each dispatch wave: the immutable
/// workflow input plus the outputs of steps that had reached `Completed`
/// by the time the wave was assembled. Every step in a wave observes the
/// same snapshot (§5 snapshot-consistency guarantee).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub input_data: HashMap<String, serde_json::Value>,
    pub step_outputs: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new(
        input_data: HashMap<String, serde_json::Value>,
        step_outputs: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            input_data,
            step_outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_exposes_both_maps() {
        let mut input = HashMap::new();
        input.insert("x".to_string(), serde_json::json!(1));
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), serde_json::json!("out"));

        let ctx = ExecutionContext::new(input, outputs);
        assert_eq!(ctx.input_data.get("x"), Some(&serde_json::json!(1)));
        assert_eq!(ctx.step_outputs.get("a"), Some(&serde_json::json!("out")));
    }
}
