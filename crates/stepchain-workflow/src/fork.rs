//! Forking new chains off a shared stream.
//!
//! A fork roots a new chain at an existing node's result without running that
//! node again. Forking is opportunistic: a value-type mismatch, a workflow
//! that already errored, or a stream built on a different workflow yields
//! `None`, never an error. Standalone streams (`StepStream::just` and friends)
//! fork into any workflow.

use std::any::type_name;

use tracing::debug;

use crate::lifecycle::ChainOrigin;
use crate::step::Step;
use crate::stream::{AnyStepStream, StepStream};
use crate::workflow::Workflow;

/// Something a new chain can be rooted at.
pub trait Fork {
  /// Root a chain on `workflow` at this stream, expecting values of type `U`.
  ///
  /// Fires the workflow's `did_fork` hook on success.
  fn fork<A, U>(&self, workflow: &Workflow<A>) -> Option<Step<A, U>>
  where
    A: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static;
}

impl Fork for AnyStepStream {
  fn fork<A, U>(&self, workflow: &Workflow<A>) -> Option<Step<A, U>>
  where
    A: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
  {
    if let Some(owner) = self.owner() {
      if owner != workflow.id() {
        debug!(
          workflow_id = %workflow.id(),
          node_id = %self.node_id(),
          owner = owner,
          "fork rejected: stream belongs to another workflow"
        );
        return None;
      }
    }

    let Some(stream) = self.downcast::<U>() else {
      debug!(
        workflow_id = %workflow.id(),
        node_id = %self.node_id(),
        expected = type_name::<U>(),
        actual = self.value_type(),
        "fork rejected: value type mismatch"
      );
      return None;
    };

    if !workflow.controller().lifecycle.record_fork(stream.node_id()) {
      return None;
    }

    Some(Step::new(
      workflow.clone(),
      stream,
      ChainOrigin::Fork,
      0,
      None,
    ))
  }
}

impl<V> Fork for StepStream<V>
where
  V: Clone + Send + Sync + 'static,
{
  fn fork<A, U>(&self, workflow: &Workflow<A>) -> Option<Step<A, U>>
  where
    A: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
  {
    self.erase().fork(workflow)
  }
}
