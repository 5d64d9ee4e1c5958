//! Controller lifecycle bookkeeping and hook dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::StepError;
use crate::guard::NodeId;
use crate::observer::WorkflowObserver;

/// Lifecycle state of a workflow controller.
///
/// Lineages rooted at the workflow decide the outcome, and any root failure
/// is terminal. A run that drives only forked lineages completes once it
/// drains. Forked lineages report through the observer but never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
  Idle,
  Running,
  Completed,
  Errored,
}

/// How many times each lifecycle hook has fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCounts {
  pub completed: usize,
  pub forked: usize,
  pub errored: usize,
}

/// Where a committed chain is rooted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOrigin {
  /// Rooted at the workflow's actionable item.
  Root,
  /// Rooted at a forked shared stream.
  Fork,
}

pub(crate) struct Lifecycle {
  workflow_id: String,
  observer: Arc<dyn WorkflowObserver>,
  state: Mutex<WorkflowState>,
  completed: AtomicUsize,
  forked: AtomicUsize,
  errored: AtomicUsize,
}

impl Lifecycle {
  pub(crate) fn new(workflow_id: String, observer: Arc<dyn WorkflowObserver>) -> Self {
    Self {
      workflow_id,
      observer,
      state: Mutex::new(WorkflowState::Idle),
      completed: AtomicUsize::new(0),
      forked: AtomicUsize::new(0),
      errored: AtomicUsize::new(0),
    }
  }

  fn lock(&self) -> MutexGuard<'_, WorkflowState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub(crate) fn state(&self) -> WorkflowState {
    *self.lock()
  }

  pub(crate) fn counts(&self) -> LifecycleCounts {
    LifecycleCounts {
      completed: self.completed.load(Ordering::SeqCst),
      forked: self.forked.load(Ordering::SeqCst),
      errored: self.errored.load(Ordering::SeqCst),
    }
  }

  /// Idle -> Running. Returns false if the workflow had already started.
  pub(crate) fn begin(&self) -> bool {
    let mut state = self.lock();
    if *state != WorkflowState::Idle {
      return false;
    }
    *state = WorkflowState::Running;
    drop(state);

    info!(workflow_id = %self.workflow_id, "workflow_started");
    true
  }

  /// Record a fork. Refused once the workflow has errored.
  pub(crate) fn record_fork(&self, node_id: NodeId) -> bool {
    if self.state() == WorkflowState::Errored {
      warn!(
        workflow_id = %self.workflow_id,
        node_id = %node_id,
        "fork refused: workflow already errored"
      );
      return false;
    }

    self.forked.fetch_add(1, Ordering::SeqCst);
    info!(workflow_id = %self.workflow_id, node_id = %node_id, "workflow_forked");
    self.observer.did_fork();
    true
  }

  /// Running -> Completed, firing `did_complete`. No-op in any other state.
  fn complete(&self, tail: Option<NodeId>) {
    let mut state = self.lock();
    if *state != WorkflowState::Running {
      return;
    }
    *state = WorkflowState::Completed;
    drop(state);

    self.completed.fetch_add(1, Ordering::SeqCst);
    match tail {
      Some(tail) => info!(workflow_id = %self.workflow_id, tail = %tail, "workflow_completed"),
      None => info!(workflow_id = %self.workflow_id, "workflow_completed"),
    }
    self.observer.did_complete();
  }

  /// Dispatch the terminal outcome of one committed lineage.
  ///
  /// Returns the error when a chain rooted at the workflow failed.
  pub(crate) fn finish_lineage(
    &self,
    origin: ChainOrigin,
    tail: NodeId,
    result: Result<(), StepError>,
  ) -> Option<StepError> {
    match result {
      Ok(()) => {
        match origin {
          ChainOrigin::Root => self.complete(Some(tail)),
          ChainOrigin::Fork => {
            info!(workflow_id = %self.workflow_id, tail = %tail, "fork_completed")
          }
        }
        None
      }
      Err(e) => {
        if origin == ChainOrigin::Root {
          // A root failure is terminal even after another root completed.
          let mut state = self.lock();
          if *state != WorkflowState::Idle {
            *state = WorkflowState::Errored;
          }
        }

        self.errored.fetch_add(1, Ordering::SeqCst);
        error!(
          workflow_id = %self.workflow_id,
          origin = ?origin,
          tail = %tail,
          node_id = %e.node_id(),
          error = %e,
          "workflow_failed"
        );
        self.observer.did_receive_error(&e);

        (origin == ChainOrigin::Root).then_some(e)
      }
    }
  }

  /// Close out a drained run: a workflow still `Running` had no root
  /// lineage decide its outcome, so it completes.
  pub(crate) fn settle(&self) {
    self.complete(None);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::observer::NoopObserver;

  #[derive(Debug, thiserror::Error)]
  #[error("bad step")]
  struct Bad;

  fn lifecycle() -> Lifecycle {
    Lifecycle::new("wf-test".to_string(), Arc::new(NoopObserver))
  }

  #[test]
  fn test_begin_only_once() {
    let lc = lifecycle();
    assert_eq!(lc.state(), WorkflowState::Idle);
    assert!(lc.begin());
    assert!(!lc.begin());
    assert_eq!(lc.state(), WorkflowState::Running);
  }

  #[test]
  fn test_completion_fires_once() {
    let lc = lifecycle();
    lc.begin();
    let tail = NodeId::next();

    lc.finish_lineage(ChainOrigin::Root, tail, Ok(()));
    lc.finish_lineage(ChainOrigin::Root, tail, Ok(()));
    lc.settle();

    assert_eq!(lc.state(), WorkflowState::Completed);
    assert_eq!(lc.counts().completed, 1);
  }

  #[test]
  fn test_fork_outcomes_leave_state_alone() {
    let lc = lifecycle();
    lc.begin();
    let tail = NodeId::next();

    assert!(lc.finish_lineage(ChainOrigin::Fork, tail, Ok(())).is_none());
    let failed = lc.finish_lineage(ChainOrigin::Fork, tail, Err(StepError::new(tail, Bad)));

    assert!(failed.is_none());
    assert_eq!(lc.state(), WorkflowState::Running);
    assert_eq!(
      lc.counts(),
      LifecycleCounts {
        completed: 0,
        forked: 0,
        errored: 1,
      }
    );
  }

  #[test]
  fn test_settle_completes_a_run_without_root_outcome() {
    let lc = lifecycle();
    lc.begin();
    lc.finish_lineage(ChainOrigin::Fork, NodeId::next(), Ok(()));

    lc.settle();
    lc.settle();

    assert_eq!(lc.state(), WorkflowState::Completed);
    assert_eq!(lc.counts().completed, 1);
  }

  #[test]
  fn test_root_failure_blocks_completion_and_forks() {
    let lc = lifecycle();
    lc.begin();
    let tail = NodeId::next();

    let failed = lc.finish_lineage(ChainOrigin::Root, tail, Err(StepError::new(tail, Bad)));
    lc.finish_lineage(ChainOrigin::Root, tail, Ok(()));
    lc.settle();

    assert_eq!(failed.map(|e| e.node_id()), Some(tail));
    assert_eq!(lc.state(), WorkflowState::Errored);
    assert_eq!(lc.counts().completed, 0);
    assert!(!lc.record_fork(tail));
    assert_eq!(lc.counts().forked, 0);
  }

  #[test]
  fn test_root_failure_after_completion_is_terminal() {
    let lc = lifecycle();
    lc.begin();
    let ok_tail = NodeId::next();
    let bad_tail = NodeId::next();

    lc.finish_lineage(ChainOrigin::Root, ok_tail, Ok(()));
    lc.finish_lineage(ChainOrigin::Root, bad_tail, Err(StepError::new(bad_tail, Bad)));

    assert_eq!(lc.state(), WorkflowState::Errored);
    assert!(!lc.record_fork(ok_tail));
  }
}
