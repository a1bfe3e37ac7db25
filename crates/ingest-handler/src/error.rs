use thiserror::Error;

/// Errors from the handler registry.
#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("handler not found: {id}")]
  HandlerNotFound { id: String },

  #[error("failed to load handler {id}: {source}")]
  HandlerLoad {
    id: String,
    #[source]
    source: HandlerError,
  },

  #[error("handler already registered: {id}")]
  AlreadyRegistered { id: String },
}

/// Errors raised by a handler itself.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
  pub message: String,
}

impl HandlerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}
