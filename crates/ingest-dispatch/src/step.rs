use async_trait::async_trait;
use ingest_store::{Execution, Stores};

use crate::error::StepError;
use crate::invocation::{StepInvocation, UnitContext};

/// Everything a step sees while running.
pub struct StepContext {
  pub invocation: StepInvocation,
  /// Snapshot of the execution taken when the step was picked up.
  pub execution: Execution,
  pub stores: Stores,
}

/// What the worker should do after a step succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
  /// Advance this invocation's chain by one step.
  Continue,
  /// Start one chain per unit, each continuing from this step.
  FanOut(Vec<UnitContext>),
}

/// A unit of work addressable by step identifier.
#[async_trait]
pub trait Step: Send + Sync {
  async fn run(&self, ctx: &StepContext) -> Result<StepOutcome, StepError>;
}
