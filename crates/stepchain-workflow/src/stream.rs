//! Shared result streams.
//!
//! A [`StepStream`] is the multicast handle to one node's eventual result. It
//! is what a fork is taken from: any number of chains may be built on top of
//! the same stream and the producer behind it still runs only once.

use std::any::{Any, type_name};
use std::error::Error as StdError;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::TryFutureExt;

use crate::error::StepError;
use crate::guard::{Joined, MulticastGuard, NodeId};

/// Cloneable, lazily evaluated handle to a single node's result.
pub struct StepStream<V> {
  guard: MulticastGuard<V>,
  /// Id of the workflow whose chain produced this stream. Standalone
  /// streams have none and may be forked into any workflow.
  owner: Option<Arc<str>>,
}

impl<V> StepStream<V>
where
  V: Clone + Send + Sync + 'static,
{
  /// A stream that resolves immediately to `value`.
  pub fn just(value: V) -> Self {
    Self::from_guard(MulticastGuard::new(NodeId::next(), async move {
      Ok(value)
    }))
  }

  /// A stream that fails immediately with `error`.
  pub fn fail<E>(error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    let node_id = NodeId::next();
    let error = StepError::new(node_id, error);
    Self::from_guard(MulticastGuard::new(node_id, async move { Err(error) }))
  }

  /// Share an arbitrary producer. It is not polled until something joins it.
  pub fn from_future<F, E>(producer: F) -> Self
  where
    F: Future<Output = Result<V, E>> + Send + 'static,
    E: StdError + Send + Sync + 'static,
  {
    let node_id = NodeId::next();
    Self::from_guard(MulticastGuard::new(
      node_id,
      producer.map_err(move |e| StepError::new(node_id, e)),
    ))
  }

  pub(crate) fn from_guard(guard: MulticastGuard<V>) -> Self {
    Self { guard, owner: None }
  }

  pub(crate) fn with_owner(mut self, owner: Arc<str>) -> Self {
    self.owner = Some(owner);
    self
  }

  /// Attach to the shared result.
  pub fn join(&self) -> Joined<V> {
    self.guard.join()
  }

  pub fn node_id(&self) -> NodeId {
    self.guard.node_id()
  }

  /// Id of the workflow whose chain produced this stream, if any.
  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  /// Whether the producer has been entered.
  pub fn is_started(&self) -> bool {
    self.guard.is_started()
  }

  /// The resolved result, if any.
  pub fn peek(&self) -> Option<Result<V, StepError>> {
    self.guard.peek()
  }

  /// Erase the value type so the stream can cross a fork boundary.
  pub fn erase(&self) -> AnyStepStream {
    AnyStepStream {
      node_id: self.node_id(),
      owner: self.owner.clone(),
      value_type: type_name::<V>(),
      inner: Arc::new(self.clone()),
    }
  }
}

impl<V> Clone for StepStream<V> {
  fn clone(&self) -> Self {
    Self {
      guard: self.guard.clone(),
      owner: self.owner.clone(),
    }
  }
}

impl<V> fmt::Debug for StepStream<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepStream")
      .field("node_id", &self.guard.node_id())
      .field("value_type", &type_name::<V>())
      .field("owner", &self.owner)
      .finish()
  }
}

impl<V> IntoFuture for StepStream<V>
where
  V: Clone + Send + Sync + 'static,
{
  type Output = Result<V, StepError>;
  type IntoFuture = Joined<V>;

  fn into_future(self) -> Self::IntoFuture {
    self.join()
  }
}

/// A [`StepStream`] whose value type is only known at runtime.
#[derive(Clone)]
pub struct AnyStepStream {
  node_id: NodeId,
  owner: Option<Arc<str>>,
  value_type: &'static str,
  inner: Arc<dyn Any + Send + Sync>,
}

impl AnyStepStream {
  /// Recover the typed stream. `None` when `U` is not the erased value type.
  pub fn downcast<U>(&self) -> Option<StepStream<U>>
  where
    U: 'static,
  {
    self.inner.downcast_ref::<StepStream<U>>().cloned()
  }

  pub fn node_id(&self) -> NodeId {
    self.node_id
  }

  /// Id of the workflow that produced the stream, if any.
  pub fn owner(&self) -> Option<&str> {
    self.owner.as_deref()
  }

  /// Name of the erased value type, for diagnostics.
  pub fn value_type(&self) -> &'static str {
    self.value_type
  }
}

impl fmt::Debug for AnyStepStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnyStepStream")
      .field("node_id", &self.node_id)
      .field("value_type", &self.value_type)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, thiserror::Error)]
  #[error("offline")]
  struct Offline;

  #[tokio::test]
  async fn test_just_and_fail() {
    assert_eq!(StepStream::just(3u8).await.unwrap(), 3);

    let failed = StepStream::<u8>::fail(Offline);
    let err = failed.clone().await.unwrap_err();
    assert_eq!(err.node_id(), failed.node_id());
    assert!(err.downcast_ref::<Offline>().is_some());
  }

  #[tokio::test]
  async fn test_from_future_runs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let stream = StepStream::from_future(async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok::<_, Offline>("ready".to_string())
    });

    assert!(!stream.is_started());
    let (a, b) = tokio::join!(stream.join(), stream.clone().into_future());

    assert_eq!(a.unwrap(), "ready");
    assert_eq!(b.unwrap(), "ready");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(stream.peek().is_some());
  }

  #[test]
  fn test_erased_stream_downcast() {
    let stream = StepStream::just(5i64);
    let erased = stream.erase();

    assert_eq!(erased.node_id(), stream.node_id());
    assert_eq!(erased.value_type(), "i64");
    assert!(erased.downcast::<i64>().is_some());
    assert!(erased.downcast::<String>().is_none());
    assert!(erased.downcast::<i32>().is_none());
  }
}
