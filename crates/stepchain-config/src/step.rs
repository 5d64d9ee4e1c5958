use serde::{Deserialize, Serialize};

use crate::scenario::ForkDef;

/// One step of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  /// Simulated work before the step resolves.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub delay_ms: Option<u64>,
  /// Value the step yields. Defaults to the prior step's value.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  /// Fail the step with this message instead of yielding a value.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fail: Option<String>,
  /// Chains forked off this step's result from inside the step.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub forks: Vec<ForkDef>,
}

impl StepDef {
  pub fn new(step_id: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      delay_ms: None,
      output: None,
      fail: None,
      forks: Vec::new(),
    }
  }

  pub fn fails(&self) -> bool {
    self.fail.is_some()
  }
}
