//! The committed workflow root.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};

use crate::error::{StepError, Undelivered};
use crate::guard::{MulticastGuard, NodeId};
use crate::lifecycle::{ChainOrigin, Lifecycle, LifecycleCounts, WorkflowState};
use crate::lineage::LineageSet;
use crate::observer::{NoopObserver, WorkflowObserver};
use crate::step::Step;
use crate::stream::StepStream;

type ItemFuture<A> = Shared<BoxFuture<'static, Result<A, Undelivered>>>;
type RunFuture = Shared<BoxFuture<'static, Result<RunReport, StepError>>>;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
  pub workflow_id: String,
  pub run_id: String,
  pub state: WorkflowState,
  pub counts: LifecycleCounts,
  /// Lineages driven to completion (successfully or not) by this run.
  pub lineages: usize,
}

/// Configuration for a [`Workflow`].
#[derive(Default)]
pub struct WorkflowBuilder {
  name: Option<String>,
  observer: Option<Arc<dyn WorkflowObserver>>,
}

impl WorkflowBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Name used in log output.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Observer receiving lifecycle hooks. Defaults to [`NoopObserver`].
  pub fn observer(mut self, observer: impl WorkflowObserver + 'static) -> Self {
    let observer: Arc<dyn WorkflowObserver> = Arc::new(observer);
    self.observer = Some(observer);
    self
  }

  pub fn build<A>(self) -> Workflow<A>
  where
    A: Clone + Send + Sync + 'static,
  {
    let observer: Arc<dyn WorkflowObserver> = match self.observer {
      Some(observer) => observer,
      None => Arc::new(NoopObserver),
    };
    Workflow::from_parts(self.name.unwrap_or_else(|| "workflow".to_string()), observer)
  }
}

/// Non-generic half of the controller: lifecycle and lineages.
pub(crate) struct Controller {
  pub(crate) workflow_id: Arc<str>,
  pub(crate) lifecycle: Arc<Lifecycle>,
  pub(crate) lineages: Arc<LineageSet>,
  run: Mutex<Option<RunFuture>>,
}

impl Controller {
  /// Join the active run, or start a new one for whatever is queued.
  fn start_run(&self) -> Run {
    let mut slot = self.run.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(run) = slot.as_ref() {
      if run.peek().is_none() {
        return Run { inner: run.clone() };
      }
    }

    if self.lineages.committed() == 0 {
      warn!(workflow_id = %self.workflow_id, "workflow subscribed before any chain was committed");
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let workflow_id = self.workflow_id.to_string();
    let lifecycle = Arc::clone(&self.lifecycle);
    let lineages = Arc::clone(&self.lineages);
    let span = info_span!("workflow_run", workflow_id = %workflow_id, run_id = %run_id);

    let run = async move {
      let drained = lineages.drive().await;
      info!(lineages = drained.finished, "run_finished");

      match drained.first_error {
        Some(e) => Err(e),
        None => {
          lifecycle.settle();
          Ok(RunReport {
            workflow_id,
            run_id,
            state: lifecycle.state(),
            counts: lifecycle.counts(),
            lineages: drained.finished,
          })
        }
      }
    }
    .instrument(span)
    .boxed()
    .shared();

    *slot = Some(run.clone());
    Run { inner: run }
  }
}

struct WorkflowInner<A> {
  name: String,
  delivery: Mutex<Option<oneshot::Sender<A>>>,
  item: ItemFuture<A>,
  controller: Arc<Controller>,
}

/// Root controller of a set of step chains sharing one actionable item.
///
/// Chains are built with [`Workflow::on_step`], finalized with
/// [`Step::commit`](crate::Step::commit) and run by [`Workflow::subscribe`].
/// Each transform receives its own clone of the actionable item, so `A` is
/// usually a cheap handle such as an `Arc`.
pub struct Workflow<A> {
  inner: Arc<WorkflowInner<A>>,
}

impl<A> Workflow<A>
where
  A: Clone + Send + Sync + 'static,
{
  /// A workflow with no observer.
  pub fn new() -> Self {
    WorkflowBuilder::new().build()
  }

  /// A workflow reporting to `observer`.
  pub fn with_observer(observer: impl WorkflowObserver + 'static) -> Self {
    WorkflowBuilder::new().observer(observer).build()
  }

  fn from_parts(name: String, observer: Arc<dyn WorkflowObserver>) -> Self {
    let workflow_id = uuid::Uuid::new_v4().to_string();
    let (sender, receiver) = oneshot::channel();
    let item = receiver
      .map(|r| r.map_err(|_| Undelivered))
      .boxed()
      .shared();

    Self {
      inner: Arc::new(WorkflowInner {
        name,
        delivery: Mutex::new(Some(sender)),
        item,
        controller: Arc::new(Controller {
          workflow_id: Arc::from(workflow_id.as_str()),
          lifecycle: Arc::new(Lifecycle::new(workflow_id, observer)),
          lineages: Arc::new(LineageSet::default()),
          run: Mutex::new(None),
        }),
      }),
    }
  }

  /// Start a chain whose first step receives the actionable item.
  ///
  /// Nothing is invoked until a committed chain is driven by a run.
  pub fn on_step<N, F, Fut, E>(&self, transform: F) -> Step<A, N>
  where
    N: Clone + Send + Sync + 'static,
    F: FnOnce(A) -> Fut + Send + 'static,
    Fut: Future<Output = Result<N, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
  {
    self.root().on_step(move |(), item| transform(item))
  }

  /// The chain's entry point: resolves once the item is delivered.
  fn root(&self) -> Step<A, ()> {
    let node_id = NodeId::next();
    let item = self.item();
    let entry = MulticastGuard::new(node_id, async move {
      item
        .await
        .map(|_| ())
        .map_err(|e| StepError::new(node_id, e))
    });

    Step::new(
      self.clone(),
      StepStream::from_guard(entry).with_owner(self.owner()),
      ChainOrigin::Root,
      0,
      None,
    )
  }

  /// Deliver `item` and drive every committed chain.
  ///
  /// The first call delivers the item. Later calls join the active run, or
  /// start a new one for chains committed since the last run finished; their
  /// item is discarded.
  pub fn subscribe(&self, item: A) -> Run {
    let sender = self
      .inner
      .delivery
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();

    match sender {
      Some(sender) => {
        self.inner.controller.lifecycle.begin();
        info!(
          workflow_id = %self.id(),
          workflow_name = %self.inner.name,
          "actionable item delivered"
        );
        // The receiver lives in `self.inner.item`, so this cannot fail.
        let _ = sender.send(item);
      }
      None => {
        warn!(workflow_id = %self.id(), "workflow already subscribed; joining existing run");
      }
    }

    self.inner.controller.start_run()
  }

  pub(crate) fn item(&self) -> ItemFuture<A> {
    self.inner.item.clone()
  }

  pub(crate) fn controller(&self) -> &Arc<Controller> {
    &self.inner.controller
  }

  /// Tag attached to every stream built on this workflow.
  pub(crate) fn owner(&self) -> Arc<str> {
    Arc::clone(&self.inner.controller.workflow_id)
  }

  pub fn id(&self) -> &str {
    &self.inner.controller.workflow_id
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn state(&self) -> WorkflowState {
    self.inner.controller.lifecycle.state()
  }

  pub fn counts(&self) -> LifecycleCounts {
    self.inner.controller.lifecycle.counts()
  }

  /// Whether an actionable item has been delivered.
  pub fn is_subscribed(&self) -> bool {
    self
      .inner
      .delivery
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .is_none()
  }

  /// A handle that does not keep the workflow alive. Prefer capturing this
  /// inside transforms that fork.
  pub fn downgrade(&self) -> WeakWorkflow<A> {
    WeakWorkflow {
      inner: Arc::downgrade(&self.inner),
    }
  }
}

impl<A> Default for Workflow<A>
where
  A: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<A> Clone for Workflow<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<A> fmt::Debug for Workflow<A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Workflow")
      .field("id", &self.inner.controller.workflow_id)
      .field("name", &self.inner.name)
      .field("state", &self.inner.controller.lifecycle.state())
      .finish()
  }
}

/// Weak handle to a [`Workflow`].
pub struct WeakWorkflow<A> {
  inner: Weak<WorkflowInner<A>>,
}

impl<A> WeakWorkflow<A> {
  pub fn upgrade(&self) -> Option<Workflow<A>> {
    self.inner.upgrade().map(|inner| Workflow { inner })
  }
}

impl<A> Clone for WeakWorkflow<A> {
  fn clone(&self) -> Self {
    Self {
      inner: Weak::clone(&self.inner),
    }
  }
}

/// Handle to a run. Await it to drive the committed chains.
///
/// Resolves once every lineage has finished: `Err` with the first failure of
/// a chain rooted at the workflow among this run's lineages, otherwise the
/// run report. Dropping every handle stops driving; a later `subscribe`
/// resumes the same run.
#[must_use = "a run does nothing unless awaited"]
#[derive(Clone)]
pub struct Run {
  inner: RunFuture,
}

impl Future for Run {
  type Output = Result<RunReport, StepError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.inner.poll_unpin(cx)
  }
}

impl fmt::Debug for Run {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Run")
      .field("finished", &self.inner.peek().is_some())
      .finish()
  }
}
