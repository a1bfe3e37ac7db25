//! Execution events and notifiers.
//!
//! The orchestrator emits an event whenever a write actually changes an
//! execution, so consumers can wait for terminal states without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while driving executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A new execution row was written.
  Created { execution_id: String, action: String },

  /// The next step was queued.
  StepDispatched {
    execution_id: String,
    step: String,
    unit: Option<String>,
  },

  /// Every unit completed.
  Finished { execution_id: String },

  /// The execution failed. `partial` is set when some units did complete.
  Failed {
    execution_id: String,
    log: Option<String>,
    partial: bool,
  },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::Created { execution_id, .. }
      | ExecutionEvent::StepDispatched { execution_id, .. }
      | ExecutionEvent::Finished { execution_id }
      | ExecutionEvent::Failed { execution_id, .. } => execution_id,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionEvent::Finished { .. } | ExecutionEvent::Failed { .. }
    )
  }
}

/// Receives execution events.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: Unbounded so a slow consumer never stalls a worker. Volume is a
  // handful of events per step.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
