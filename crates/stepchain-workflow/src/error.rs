//! Step failure type.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use crate::guard::NodeId;

/// The failure of a step's asynchronous producer.
///
/// This is the only error kind the engine produces. It is cheap to clone so a
/// single shared result can be handed to every consumer joined on the node
/// that failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("step {node_id} failed: {source}")]
pub struct StepError {
  node_id: NodeId,
  #[source]
  source: Arc<dyn StdError + Send + Sync>,
}

impl StepError {
  /// Wrap the error returned by the producer of `node_id`.
  ///
  /// A `StepError` passed back in (for example a step that awaits another
  /// chain's stream) is kept as is, so the originating node is preserved.
  pub fn new<E>(node_id: NodeId, error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    if let Some(step_error) = (&error as &dyn Any).downcast_ref::<StepError>() {
      return step_error.clone();
    }

    Self {
      node_id,
      source: Arc::new(error),
    }
  }

  /// The node whose producer failed first.
  pub fn node_id(&self) -> NodeId {
    self.node_id
  }

  /// Borrow the underlying error as a concrete type.
  pub fn downcast_ref<E>(&self) -> Option<&E>
  where
    E: StdError + 'static,
  {
    (*self.source).downcast_ref::<E>()
  }
}

/// The workflow was dropped before an actionable item was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("workflow dropped before an actionable item was delivered")]
pub struct Undelivered;
