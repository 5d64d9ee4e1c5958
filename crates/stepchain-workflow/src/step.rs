//! Step nodes and the chain builder.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::StepError;
use crate::guard::{MulticastGuard, NodeId};
use crate::lifecycle::ChainOrigin;
use crate::stream::StepStream;
use crate::workflow::Workflow;

/// An immutable chain of steps ending in a node that yields `V`.
///
/// Appending never mutates the receiver: every `on_step` returns a new chain
/// that shares its predecessors, so a chain value can be extended, forked
/// and committed any number of times.
pub struct Step<A, V> {
  workflow: Workflow<A>,
  stream: StepStream<V>,
  origin: ChainOrigin,
  depth: usize,
  predecessor: Option<NodeId>,
}

impl<A, V> Step<A, V>
where
  A: Clone + Send + Sync + 'static,
  V: Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    workflow: Workflow<A>,
    stream: StepStream<V>,
    origin: ChainOrigin,
    depth: usize,
    predecessor: Option<NodeId>,
  ) -> Self {
    Self {
      workflow,
      stream,
      origin,
      depth,
      predecessor,
    }
  }

  /// Append a step receiving this chain's result and the actionable item.
  ///
  /// The transform runs at most once, after every predecessor resolved
  /// successfully. A predecessor failure skips it and is passed downstream.
  pub fn on_step<N, F, Fut, E>(&self, transform: F) -> Step<A, N>
  where
    N: Clone + Send + Sync + 'static,
    F: FnOnce(V, A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<N, E>> + Send + 'static,
    E: StdError + Send + Sync + 'static,
  {
    let node_id = NodeId::next();
    let depth = self.depth + 1;
    let prior = self.stream.join();
    let item = self.workflow.item();
    let span = info_span!(
      "step",
      workflow_id = %self.workflow.id(),
      node_id = %node_id,
      depth = depth
    );

    let producer = async move {
      let value = match prior.await {
        Ok(value) => value,
        Err(e) => {
          debug!(upstream = %e.node_id(), "step_skipped");
          return Err(e);
        }
      };
      let item = item.await.map_err(|e| StepError::new(node_id, e))?;

      info!("step_started");
      match transform(value, item).await {
        Ok(next) => {
          info!("step_completed");
          Ok(next)
        }
        Err(e) => {
          let e = StepError::new(node_id, e);
          error!(error = %e, "step_failed");
          Err(e)
        }
      }
    }
    .instrument(span);

    Step::new(
      self.workflow.clone(),
      StepStream::from_guard(MulticastGuard::new(node_id, producer))
        .with_owner(self.workflow.owner()),
      self.origin,
      depth,
      Some(self.stream.node_id()),
    )
  }

  /// Observe a failure of the chain so far. The result is passed through
  /// unchanged and the handler runs at most once.
  pub fn on_error<F>(&self, handler: F) -> Step<A, V>
  where
    F: FnOnce(&StepError) + Send + 'static,
  {
    let node_id = NodeId::next();
    let prior = self.stream.join();
    let tap = async move {
      let result = prior.await;
      if let Err(e) = &result {
        handler(e);
      }
      result
    };

    Step::new(
      self.workflow.clone(),
      StepStream::from_guard(MulticastGuard::new(node_id, tap))
        .with_owner(self.workflow.owner()),
      self.origin,
      self.depth,
      Some(self.stream.node_id()),
    )
  }

  /// Finalize this chain as a lineage of its workflow.
  ///
  /// Execution starts only once the workflow is subscribed. Committing the
  /// same chain value again is a no-op.
  pub fn commit(&self) -> Workflow<A> {
    let controller = self.workflow.controller();
    let lifecycle = Arc::clone(&controller.lifecycle);
    let origin = self.origin;
    let tail = self.stream.node_id();
    let tail_result = self.stream.join();

    let lineage = async move {
      let result = tail_result.await.map(|_| ());
      lifecycle.finish_lineage(origin, tail, result)
    }
    .boxed();

    if controller.lineages.register(tail, lineage) {
      debug!(
        workflow_id = %self.workflow.id(),
        tail = %tail,
        origin = ?origin,
        depth = self.depth,
        "lineage_committed"
      );
    } else {
      debug!(workflow_id = %self.workflow.id(), tail = %tail, "lineage already committed");
    }

    self.workflow.clone()
  }

  /// The shared result of this chain's last node.
  pub fn as_stream(&self) -> StepStream<V> {
    self.stream.clone()
  }

  pub fn node_id(&self) -> NodeId {
    self.stream.node_id()
  }

  /// The node this one was appended to, if any.
  pub fn predecessor(&self) -> Option<NodeId> {
    self.predecessor
  }

  /// Number of steps between this node and the chain's root.
  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn origin(&self) -> ChainOrigin {
    self.origin
  }

  pub fn workflow(&self) -> &Workflow<A> {
    &self.workflow
  }
}

impl<A, V> Clone for Step<A, V> {
  fn clone(&self) -> Self {
    Self {
      workflow: self.workflow.clone(),
      stream: self.stream.clone(),
      origin: self.origin,
      depth: self.depth,
      predecessor: self.predecessor,
    }
  }
}

impl<A, V> fmt::Debug for Step<A, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Step")
      .field("stream", &self.stream)
      .field("origin", &self.origin)
      .field("depth", &self.depth)
      .field("predecessor", &self.predecessor)
      .finish()
  }
}
