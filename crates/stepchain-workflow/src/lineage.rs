//! Committed lineages and the loop that drives them.
//!
//! The engine never spawns. Committed chains are queued here and polled by
//! whichever run handle is being awaited. Chains committed from inside a
//! running step join the same run.

use std::collections::HashSet;
use std::future::poll_fn;
use std::sync::{Mutex, MutexGuard};
use std::task::{Poll, Waker};

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;

use crate::error::StepError;
use crate::guard::NodeId;

/// A committed lineage. Resolves to the failure of a chain rooted at the
/// workflow, if it had one.
pub(crate) type Lineage = BoxFuture<'static, Option<StepError>>;

#[derive(Default)]
struct Incoming {
  queue: Vec<Lineage>,
  /// Tails committed since the current run started. Cleared when a run
  /// drains, so the set only ever holds one run's lineages.
  committed: HashSet<NodeId>,
  waker: Option<Waker>,
}

/// What one call to [`LineageSet::drive`] did.
#[derive(Debug, Default)]
pub(crate) struct Drained {
  pub(crate) finished: usize,
  pub(crate) first_error: Option<StepError>,
}

#[derive(Default)]
pub(crate) struct LineageSet {
  incoming: Mutex<Incoming>,
}

impl LineageSet {
  fn lock(&self) -> MutexGuard<'_, Incoming> {
    self.incoming.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Queue a lineage ending at `tail`. Returns false if that tail is already
  /// queued or being driven.
  pub(crate) fn register(&self, tail: NodeId, lineage: Lineage) -> bool {
    let mut incoming = self.lock();
    if !incoming.committed.insert(tail) {
      return false;
    }
    incoming.queue.push(lineage);
    let waker = incoming.waker.take();
    drop(incoming);

    if let Some(waker) = waker {
      waker.wake();
    }
    true
  }

  pub(crate) fn committed(&self) -> usize {
    self.lock().committed.len()
  }

  /// Poll every queued lineage to completion, including ones queued while
  /// polling. Resolves when nothing is left.
  pub(crate) async fn drive(&self) -> Drained {
    let mut active = FuturesUnordered::new();
    let mut drained = Drained::default();

    poll_fn(|cx| {
      loop {
        {
          let mut incoming = self.lock();
          active.extend(incoming.queue.drain(..));
          incoming.waker = Some(cx.waker().clone());
        }

        match active.poll_next_unpin(cx) {
          Poll::Ready(Some(outcome)) => {
            drained.finished += 1;
            if drained.first_error.is_none() {
              drained.first_error = outcome;
            }
          }
          Poll::Ready(None) | Poll::Pending => {
            // Steps may commit new lineages while being polled.
            let mut incoming = self.lock();
            if !incoming.queue.is_empty() {
              continue;
            }
            if active.is_empty() {
              incoming.waker = None;
              incoming.committed.clear();
              return Poll::Ready(());
            }
            return Poll::Pending;
          }
        }
      }
    })
    .await;

    drained
  }
}
