//! Named-step workflow scaffolding.
//!
//! Each [`Action`] declares the named outputs it consumes and produces.
//! A [`StepContext`] is never mutated in place: merging a [`StepOutput`]
//! yields a new context for the next step.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use policyharvest_shared::{PolicyHarvestError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, warn};

/// Version stamped on every [`StepOutput`].
pub const STEP_OUTPUT_VERSION: u32 = 1;

/// Read-only input to one workflow step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    /// Caller-supplied parameters for this step.
    pub params: Value,
    /// Outputs accumulated from earlier steps, by name.
    pub values: BTreeMap<String, Value>,
    pub workflow_run_id: Option<String>,
    pub step_id: Option<String>,
}

impl StepContext {
    pub fn new(params: Value) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn with_run(mut self, workflow_run_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        self.workflow_run_id = Some(workflow_run_id.into());
        self.step_id = Some(step_id.into());
        self
    }

    /// Same accumulated outputs, fresh parameters for the next step.
    pub fn for_step(&self, params: Value, step_id: impl Into<String>) -> Self {
        Self {
            params,
            values: self.values.clone(),
            workflow_run_id: self.workflow_run_id.clone(),
            step_id: Some(step_id.into()),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// A new context with `output` layered over the current values.
    pub fn merge(&self, output: &StepOutput) -> Self {
        let mut next = self.clone();
        next.values
            .extend(output.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        next
    }
}

/// Named outputs of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub version: u32,
    pub outputs: BTreeMap<String, Value>,
}

impl Default for StepOutput {
    fn default() -> Self {
        Self {
            version: STEP_OUTPUT_VERSION,
            outputs: BTreeMap::new(),
        }
    }
}

impl StepOutput {
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Output names this action writes.
    fn produces(&self) -> &[&'static str];

    /// Output names this action reads from earlier steps.
    fn consumes(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &StepContext, run_id: &str) -> Result<StepOutput>;
}

/// Actions addressable by name.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_action(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        let name = name.into();
        if self.actions.insert(name.clone(), action).is_some() {
            warn!(action = %name, "action re-registered; previous handler replaced");
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Run the named action against `ctx`.
    #[instrument(skip(self, ctx), fields(action = %name))]
    pub async fn invoke(&self, name: &str, ctx: &StepContext, run_id: &str) -> Result<StepOutput> {
        let action = self.get(name).ok_or_else(|| {
            PolicyHarvestError::validation(format!("no action registered under '{name}'"))
        })?;

        for input in action.consumes() {
            if ctx.get(input).is_none() {
                warn!(action = %name, input, "declared input missing from step context");
            }
        }

        let output = action.execute(ctx, run_id).await?;
        for declared in action.produces() {
            if !output.outputs.contains_key(*declared) {
                warn!(action = %name, output = declared, "declared output not produced");
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Action for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn produces(&self) -> &[&'static str] {
            &["echoed"]
        }

        fn consumes(&self) -> &[&'static str] {
            &["query_id"]
        }

        async fn execute(&self, ctx: &StepContext, run_id: &str) -> Result<StepOutput> {
            let seen = ctx.get_str("query_id").unwrap_or("none").to_string();
            Ok(StepOutput::default().with("echoed", format!("{run_id}:{seen}")))
        }
    }

    #[tokio::test]
    async fn merged_outputs_reach_later_steps() {
        let mut registry = ActionRegistry::new();
        registry.register_action("echo", Arc::new(Echo));

        let first = StepContext::new(json!({}));
        let prior = StepOutput::default().with("query_id", "q-1");
        let second = first.merge(&prior);

        assert!(first.get("query_id").is_none());
        let output = registry.invoke("echo", &second, "run-9").await.unwrap();
        assert_eq!(output.outputs["echoed"], json!("run-9:q-1"));
        assert_eq!(output.version, STEP_OUTPUT_VERSION);
    }

    #[tokio::test]
    async fn unknown_action_is_a_validation_error() {
        let registry = ActionRegistry::new();
        let err = registry
            .invoke("missing", &StepContext::default(), "run-1")
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn later_outputs_shadow_earlier_ones() {
        let ctx = StepContext::default()
            .merge(&StepOutput::default().with("query_id", "old"))
            .merge(&StepOutput::default().with("query_id", "new"));
        assert_eq!(ctx.get_str("query_id"), Some("new"));

        let next = ctx.for_step(json!({"subject": "afval"}), "step-2");
        assert_eq!(next.get_str("query_id"), Some("new"));
        assert_eq!(next.step_id.as_deref(), Some("step-2"));
    }
}
