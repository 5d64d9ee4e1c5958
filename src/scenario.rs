//! Builds and runs a workflow from a scenario definition.
//!
//! Each step records its invocation under a path made of the scenario name,
//! fork ids and step ids (`orders/load/audit/write`). Forks are taken from
//! inside the step that owns them, off that step's own result.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use stepchain_config::{ScenarioDef, StepDef};
use stepchain_workflow::{
  ChannelObserver, Fork, Joined, LifecycleCounts, Step, StepStream, WeakWorkflow, Workflow,
  WorkflowBuilder, WorkflowEvent, WorkflowState,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The actionable item handed to every step.
pub type Item = Arc<Value>;

type Invocations = Arc<Mutex<BTreeMap<String, usize>>>;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
  #[error("step '{path}' failed: {message}")]
  StepFailed { path: String, message: String },
}

/// Outcome of one scenario run, printed as JSON.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
  pub scenario: String,
  pub workflow_id: String,
  pub state: WorkflowState,
  pub counts: LifecycleCounts,
  pub invocations: BTreeMap<String, usize>,
  pub events: Vec<WorkflowEvent>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl ScenarioReport {
  /// Whether the chain rooted at the payload failed.
  pub fn root_failed(&self) -> bool {
    self.error.is_some()
  }
}

#[derive(Clone)]
struct ChainContext {
  workflow: WeakWorkflow<Item>,
  invocations: Invocations,
}

impl ChainContext {
  fn record(&self, path: &str) {
    let mut invocations = self.invocations.lock().unwrap_or_else(|e| e.into_inner());
    *invocations.entry(path.to_string()).or_default() += 1;
  }
}

/// A workflow built from a scenario, ready to be subscribed.
pub struct Scenario {
  name: String,
  workflow: Workflow<Item>,
  invocations: Invocations,
  events: mpsc::UnboundedReceiver<WorkflowEvent>,
}

impl Scenario {
  pub fn build(def: &ScenarioDef) -> Self {
    let (tx, events) = mpsc::unbounded_channel();
    let workflow: Workflow<Item> = WorkflowBuilder::new()
      .name(def.name.clone())
      .observer(ChannelObserver::new(tx))
      .build();

    let mut paths = BTreeMap::new();
    collect_paths(&def.name, &def.steps, &mut paths);
    let ctx = ChainContext {
      workflow: workflow.downgrade(),
      invocations: Arc::new(Mutex::new(paths)),
    };

    if let Some((first, rest)) = def.steps.split_first() {
      let body = step_body(first, &def.name, &ctx);
      let head = workflow.on_step(move |item: Item| body(item.as_ref().clone(), item));
      extend(head, rest, &def.name, &ctx).commit();
    }

    Self {
      name: def.name.clone(),
      workflow,
      invocations: ctx.invocations,
      events,
    }
  }

  /// Deliver `payload` and wait for every committed chain.
  pub async fn run(mut self, payload: Value) -> ScenarioReport {
    let result = self.workflow.subscribe(Arc::new(payload)).await;

    let mut events = Vec::new();
    while let Ok(event) = self.events.try_recv() {
      events.push(event);
    }
    let invocations = self
      .invocations
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone();

    ScenarioReport {
      scenario: self.name,
      workflow_id: self.workflow.id().to_string(),
      state: self.workflow.state(),
      counts: self.workflow.counts(),
      invocations,
      events,
      error: result.err().map(|e| e.to_string()),
    }
  }
}

/// Read and validate a scenario file.
pub async fn load(path: &Path) -> Result<ScenarioDef> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read scenario file: {}", path.display()))?;

  ScenarioDef::from_json(&content)
    .with_context(|| format!("invalid scenario file: {}", path.display()))
}

fn collect_paths(chain: &str, steps: &[StepDef], paths: &mut BTreeMap<String, usize>) {
  for step in steps {
    let path = format!("{}/{}", chain, step.step_id);
    for fork in &step.forks {
      collect_paths(&format!("{}/{}", path, fork.fork_id), &fork.steps, paths);
    }
    paths.insert(path, 0);
  }
}

fn extend(
  head: Step<Item, Value>,
  steps: &[StepDef],
  chain: &str,
  ctx: &ChainContext,
) -> Step<Item, Value> {
  steps.iter().fold(head, |step, def| {
    let body = step_body(def, chain, ctx);
    step.on_step(body)
  })
}

fn step_body(
  def: &StepDef,
  chain: &str,
  ctx: &ChainContext,
) -> impl FnOnce(Value, Item) -> Joined<Value> + Send + use<> {
  let def = def.clone();
  let path = format!("{}/{}", chain, def.step_id);
  let ctx = ctx.clone();

  move |prior: Value, _item: Item| {
    ctx.record(&path);

    let delay = def.delay_ms.map(Duration::from_millis);
    let outcome = match def.fail {
      Some(message) => Err(ScenarioError::StepFailed {
        path: path.clone(),
        message,
      }),
      None => Ok(def.output.unwrap_or(prior)),
    };
    let result = StepStream::from_future(async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      outcome
    });

    if !def.forks.is_empty() {
      match ctx.workflow.upgrade() {
        Some(workflow) => {
          for fork in &def.forks {
            let chain = format!("{}/{}", path, fork.fork_id);
            let forked: Option<Step<Item, Value>> = result.fork(&workflow);
            match forked {
              Some(forked) => {
                debug!(fork = %chain, "fork taken");
                extend(forked, &fork.steps, &chain, &ctx).commit();
              }
              None => warn!(fork = %chain, "fork refused"),
            }
          }
        }
        None => warn!(step = %path, "workflow dropped before forks were taken"),
      }
    }

    result.join()
  }
}
