//! Stepchain Workflow
//!
//! Declarative chains of asynchronous steps that run exactly once against a
//! single actionable item, with forks that reuse an already computed result.
//!
//! # Architecture
//!
//! ```text
//! Workflow<A>                    root controller, lifecycle hooks
//! ├── on_step(|item| ..)  -> Step<A, V>
//! └── subscribe(item)     -> Run (drives every committed lineage)
//!
//! Step<A, V>                     immutable chain, one node per on_step
//! ├── on_step(|prior, item| ..) -> Step<A, N>
//! ├── as_stream()         -> StepStream<V>
//! └── commit()            -> Workflow<A>
//!
//! StepStream<V>                  multicast handle to one node's result
//! └── fork(&workflow)     -> Option<Step<A, U>>
//! ```
//!
//! The engine owns no threads. Nothing runs until a run handle is awaited,
//! and every node's transform is invoked at most once no matter how many
//! chains or forks are built on top of it.
//!
//! # Usage
//!
//! ```ignore
//! use stepchain_workflow::{Fork, Workflow};
//!
//! let workflow: Workflow<Arc<Session>> = Workflow::new();
//! let weak = workflow.downgrade();
//! workflow
//!   .on_step(|session| async move { session.load_profile().await })
//!   .on_step(move |profile, _session| {
//!     let stream = StepStream::just(profile.clone());
//!     if let Some(forked) = weak.upgrade().and_then(|wf| stream.fork::<_, Profile>(&wf)) {
//!       forked.on_step(|profile, session| async move { session.prefetch(profile).await }).commit();
//!     }
//!     async move { Ok::<_, SessionError>(profile) }
//!   })
//!   .commit()
//!   .subscribe(session)
//!   .await?;
//! ```

mod error;
mod fork;
mod guard;
mod lifecycle;
mod lineage;
mod observer;
mod step;
mod stream;
mod workflow;

pub use error::{StepError, Undelivered};
pub use fork::Fork;
pub use guard::{Joined, NodeId};
pub use lifecycle::{ChainOrigin, LifecycleCounts, WorkflowState};
pub use observer::{ChannelObserver, NoopObserver, WorkflowEvent, WorkflowObserver};
pub use step::Step;
pub use stream::{AnyStepStream, StepStream};
pub use workflow::{Run, RunReport, WeakWorkflow, Workflow, WorkflowBuilder};
