//! Stepchain Config
//!
//! Serializable scenario definitions for the stepchain CLI. A scenario is one
//! root chain of steps; any step may fork further chains off its own result.
//! The CLI loads a scenario from a JSON file, validates it, and builds a
//! workflow from it.

mod error;
mod scenario;
mod step;

pub use error::ConfigError;
pub use scenario::{ForkDef, ScenarioDef};
pub use step::StepDef;
