use thiserror::Error;

/// Errors from the dispatch transport.
#[derive(Debug, Error)]
pub enum DispatchError {
  /// No step is registered under the identifier.
  #[error("unknown step: {step}")]
  UnknownStep { step: String },

  /// The queue has no consumer any more.
  #[error("dispatch queue closed")]
  Closed,

  /// The pending task result could not be written.
  #[error("failed to record pending task: {0}")]
  Store(#[from] ingest_store::Error),
}

/// A step failed to run. The message ends up in the task result and the
/// execution log.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
  pub message: String,
}

impl StepError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

impl From<ingest_store::Error> for StepError {
  fn from(e: ingest_store::Error) -> Self {
    Self::new(e.to_string())
  }
}
