use ingest_dispatch::DispatchError;
use ingest_handler::RegistryError;

/// Errors that can occur while driving an execution.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
  /// No execution row exists for the identifier.
  #[error("execution '{execution_id}' not found")]
  ExecutionNotFound { execution_id: String },

  /// The handler could not be found or built.
  #[error(transparent)]
  Handler(#[from] RegistryError),

  /// No registered handler claims the submitted input.
  #[error("the requested input is not supported: {input}")]
  UnsupportedInput { input: String },

  /// An entry of the `layers` parameter carries no usable name.
  #[error("layer {index} has no name")]
  UnnamedLayer { index: usize },

  /// The handler has no step sequence for the action.
  #[error("handler '{handler_id}' does not support action '{action}'")]
  ActionNotSupported { action: String, handler_id: String },

  /// The current step is not part of the handler's sequence.
  #[error("step '{step}' is not part of the '{action}' sequence of handler '{handler_id}'")]
  StepNotInSequence {
    step: String,
    action: String,
    handler_id: String,
  },

  /// The next step could not be enqueued.
  #[error("failed to dispatch step: {0}")]
  Dispatch(#[from] DispatchError),

  /// A store read or write failed.
  #[error("store error: {0}")]
  Store(#[from] ingest_store::Error),
}
