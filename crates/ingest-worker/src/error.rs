use ingest_orchestrator::OrchestratorError;

/// Errors raised while processing one invocation.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  /// No step is registered under the invocation's identifier.
  #[error("unknown step: {step}")]
  UnknownStep { step: String },

  /// The step ran and failed. The execution has been updated accordingly.
  #[error("step '{step}' failed: {message}")]
  StepFailed { step: String, message: String },

  /// Reading or advancing the execution failed.
  #[error(transparent)]
  Orchestrator(#[from] OrchestratorError),

  /// A task result could not be written.
  #[error("store error: {0}")]
  Store(#[from] ingest_store::Error),
}
