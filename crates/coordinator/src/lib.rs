//! Orchestration core for Cortex.
//!
//! A query flows through four stages:
//!
//! 1. [`IntentClassifier`] maps it to one of five execution intents, falling
//!    back to a keyword [`heuristic`] when the model's reply is unusable.
//! 2. The memory context is assembled concurrently with classification.
//! 3. [`ExecutionRouter`] drives the chosen path, running tools through a
//!    [`ToolRunner`] where needed.
//! 4. [`compose`] aggregates everything into an `ExecutionResult`.
//!
//! [`Orchestrator`] ties the stages together.

pub mod classifier;
pub mod composer;
pub mod config;
pub mod heuristic;
pub mod orchestrator;
pub mod router;
pub mod tool_runner;

#[cfg(test)]
mod test_support;

pub use classifier::{parse_intent, BatchEntry, BatchItem, BatchSummary, IntentClassifier};
pub use composer::{compose, Composition};
pub use config::{ClassifierConfig, CoordinatorConfig, RouterConfig};
pub use orchestrator::Orchestrator;
pub use router::{Answer, ExecutionRouter, ToolStage};
pub use tool_runner::{dependency_layers, ToolPlan, ToolRunner};
