//! Lifecycle observers.
//!
//! The controller reports completion, forks and failures to a
//! [`WorkflowObserver`]. Every hook defaults to a no-op so an observer only
//! implements what it cares about.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StepError;

/// Receives workflow lifecycle notifications.
pub trait WorkflowObserver: Send + Sync {
  /// The root chain resolved successfully. Called at most once per workflow.
  fn did_complete(&self) {}

  /// A fork was taken from this workflow.
  fn did_fork(&self) {}

  /// A committed lineage failed. Called once per failed lineage.
  fn did_receive_error(&self, _error: &StepError) {}
}

impl<O: WorkflowObserver + ?Sized> WorkflowObserver for Arc<O> {
  fn did_complete(&self) {
    (**self).did_complete();
  }

  fn did_fork(&self) {
    (**self).did_fork();
  }

  fn did_receive_error(&self, error: &StepError) {
    (**self).did_receive_error(error);
  }
}

/// An observer that ignores every notification.
#[derive(Debug, Clone, Default)]
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Lifecycle notifications as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
  Completed,
  Forked,
  Errored { node_id: u64, error: String },
}

/// An observer that forwards notifications to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
  // Hooks run inside steps and must not block.
  sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelObserver {
  pub fn new(sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
    Self { sender }
  }
}

impl WorkflowObserver for ChannelObserver {
  fn did_complete(&self) {
    // Receiver may have been dropped
    let _ = self.sender.send(WorkflowEvent::Completed);
  }

  fn did_fork(&self) {
    let _ = self.sender.send(WorkflowEvent::Forked);
  }

  fn did_receive_error(&self, error: &StepError) {
    let _ = self.sender.send(WorkflowEvent::Errored {
      node_id: error.node_id().as_u64(),
      error: error.to_string(),
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::guard::NodeId;

  #[derive(Debug, thiserror::Error)]
  #[error("lost connection")]
  struct Lost;

  #[test]
  fn test_channel_observer_forwards_events() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = ChannelObserver::new(tx);
    let node_id = NodeId::next();

    observer.did_fork();
    observer.did_receive_error(&StepError::new(node_id, Lost));
    observer.did_complete();

    assert_eq!(rx.try_recv().unwrap(), WorkflowEvent::Forked);
    match rx.try_recv().unwrap() {
      WorkflowEvent::Errored { node_id: id, error } => {
        assert_eq!(id, node_id.as_u64());
        assert!(error.contains("lost connection"));
      }
      other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(rx.try_recv().unwrap(), WorkflowEvent::Completed);
  }

  #[test]
  fn test_channel_observer_survives_dropped_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    ChannelObserver::new(tx).did_complete();
  }

  #[test]
  fn test_event_serialization() {
    let json = serde_json::to_value(WorkflowEvent::Errored {
      node_id: 3,
      error: "boom".to_string(),
    })
    .unwrap();

    assert_eq!(json["event"], "errored");
    assert_eq!(json["node_id"], 3);
  }
}
