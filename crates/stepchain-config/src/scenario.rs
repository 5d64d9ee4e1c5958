use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::StepDef;

/// A root chain rooted at the actionable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDef {
  pub name: String,
  pub steps: Vec<StepDef>,
}

/// A chain forked off a step's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkDef {
  pub fork_id: String,
  pub steps: Vec<StepDef>,
}

impl ScenarioDef {
  /// Parse and validate a scenario from JSON.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let scenario: ScenarioDef = serde_json::from_str(json)?;
    scenario.validate()?;
    Ok(scenario)
  }

  /// Every chain needs at least one step, step ids are unique within their
  /// chain and fork ids are unique under their step.
  pub fn validate(&self) -> Result<(), ConfigError> {
    validate_chain(&self.name, &self.steps)
  }

  /// Number of steps across the root chain and every nested fork.
  pub fn step_count(&self) -> usize {
    count_steps(&self.steps)
  }
}

fn validate_chain(chain: &str, steps: &[StepDef]) -> Result<(), ConfigError> {
  if steps.is_empty() {
    return Err(ConfigError::EmptyChain(chain.to_string()));
  }

  let mut seen = HashSet::new();
  for step in steps {
    if !seen.insert(step.step_id.as_str()) {
      return Err(ConfigError::DuplicateStep {
        chain: chain.to_string(),
        step_id: step.step_id.clone(),
      });
    }

    let step_path = format!("{}/{}", chain, step.step_id);
    let mut forks = HashSet::new();
    for fork in &step.forks {
      if !forks.insert(fork.fork_id.as_str()) {
        return Err(ConfigError::DuplicateFork {
          step_path,
          fork_id: fork.fork_id.clone(),
        });
      }
      validate_chain(&format!("{}/{}", step_path, fork.fork_id), &fork.steps)?;
    }
  }

  Ok(())
}

fn count_steps(steps: &[StepDef]) -> usize {
  steps
    .iter()
    .map(|s| 1 + s.forks.iter().map(|f| count_steps(&f.steps)).sum::<usize>())
    .sum()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_optional_fields_default() {
    let json = r#"{ "name": "s", "steps": [{ "step_id": "a" }] }"#;
    let scenario = ScenarioDef::from_json(json).unwrap();

    assert_eq!(scenario.steps, vec![StepDef::new("a")]);
  }

  #[test]
  fn test_empty_fork_is_rejected() {
    let mut step = StepDef::new("a");
    step.forks.push(ForkDef {
      fork_id: "f".to_string(),
      steps: vec![],
    });
    let scenario = ScenarioDef {
      name: "s".to_string(),
      steps: vec![step],
    };

    match scenario.validate() {
      Err(ConfigError::EmptyChain(chain)) => assert_eq!(chain, "s/a/f"),
      other => panic!("expected EmptyChain, got {:?}", other),
    }
  }
}
