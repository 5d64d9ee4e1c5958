//! Single-shot multicast guard for a node's producer.
//!
//! Every node wraps its producer once, keyed by its [`NodeId`]. The first
//! consumer to poll a join starts the producer; every other join attaches to
//! the in-flight or resolved result. The check-and-start is serialized by the
//! shared cell, so concurrent joins can never both see "not started".

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::StepError;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a step node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
  pub(crate) fn next() -> Self {
    Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "node-{}", self.0)
  }
}

/// A join on a guarded producer. Cloning it does not restart anything.
pub type Joined<T> = Shared<BoxFuture<'static, Result<T, StepError>>>;

/// Lock-protected started/result cell around one node's producer.
pub(crate) struct MulticastGuard<T> {
  node_id: NodeId,
  started: Arc<AtomicBool>,
  shared: Joined<T>,
}

impl<T> MulticastGuard<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Guard `producer`. Nothing runs until the first join is polled.
  pub(crate) fn new<F>(node_id: NodeId, producer: F) -> Self
  where
    F: Future<Output = Result<T, StepError>> + Send + 'static,
  {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    let shared = async move {
      flag.store(true, Ordering::Release);
      producer.await
    }
    .boxed()
    .shared();

    Self {
      node_id,
      started,
      shared,
    }
  }

  /// Subscribe-or-join: attach to the producer, starting it on first poll.
  pub(crate) fn join(&self) -> Joined<T> {
    self.shared.clone()
  }

  /// The resolved result, if the producer has finished.
  pub(crate) fn peek(&self) -> Option<Result<T, StepError>> {
    self.shared.peek().cloned()
  }
}

impl<T> MulticastGuard<T> {
  pub(crate) fn node_id(&self) -> NodeId {
    self.node_id
  }

  pub(crate) fn is_started(&self) -> bool {
    self.started.load(Ordering::Acquire)
  }
}

impl<T> Clone for MulticastGuard<T> {
  fn clone(&self) -> Self {
    Self {
      node_id: self.node_id,
      started: Arc::clone(&self.started),
      shared: self.shared.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  fn counted_guard(calls: Arc<AtomicUsize>) -> MulticastGuard<u32> {
    MulticastGuard::new(NodeId::next(), async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(5)).await;
      Ok(42)
    })
  }

  #[test]
  fn test_node_ids_are_unique() {
    let a = NodeId::next();
    let b = NodeId::next();
    assert_ne!(a, b);
    assert!(a.to_string().starts_with("node-"));
  }

  #[tokio::test]
  async fn test_guard_is_lazy() {
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = counted_guard(calls.clone());
    let _join = guard.join();

    tokio::task::yield_now().await;

    assert!(!guard.is_started());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(guard.peek().is_none());
  }

  #[tokio::test]
  async fn test_joins_share_one_evaluation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = counted_guard(calls.clone());

    let (a, b, c) = tokio::join!(guard.join(), guard.join(), guard.join());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (42, 42, 42));
    assert!(guard.is_started());
    assert_eq!(guard.peek().map(|r| r.unwrap()), Some(42));

    // A late join observes the resolved result.
    assert_eq!(guard.join().await.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_joins_across_threads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = counted_guard(calls.clone());

    let handles: Vec<_> = (0..16)
      .map(|_| tokio::spawn(guard.join()))
      .collect();
    for handle in futures::future::join_all(handles).await {
      assert_eq!(handle.unwrap().unwrap(), 42);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_dropped_joiner_does_not_restart() {
    let calls = Arc::new(AtomicUsize::new(0));
    let guard = counted_guard(calls.clone());

    // Poll once, then abandon the join mid-flight.
    let first = guard.join();
    let _ = tokio::time::timeout(Duration::from_millis(1), first).await;

    assert_eq!(guard.join().await.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
