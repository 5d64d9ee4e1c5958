use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to parse scenario: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("chain '{0}' has no steps")]
  EmptyChain(String),

  #[error("duplicate step id '{step_id}' in chain '{chain}'")]
  DuplicateStep { chain: String, step_id: String },

  #[error("duplicate fork id '{fork_id}' under step '{step_path}'")]
  DuplicateFork { step_path: String, fork_id: String },
}
