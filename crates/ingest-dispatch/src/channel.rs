use std::sync::Arc;

use async_trait::async_trait;
use ingest_store::TaskResultStore;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DispatchError;
use crate::invocation::StepInvocation;
use crate::registry::StepRegistry;

/// Enqueues step invocations for asynchronous execution.
///
/// Dispatch is fire-and-forget: it returns once the invocation is queued.
#[async_trait]
pub trait Dispatcher: Send + Sync {
  async fn dispatch(&self, invocation: StepInvocation) -> Result<(), DispatchError>;
}

/// A dispatcher that sends invocations to an in-process channel.
///
/// Every accepted invocation gets a pending task result before it is
/// queued, so reconciliation sees it as in flight until a worker settles it.
#[derive(Clone)]
pub struct ChannelDispatcher {
  // NOTE: Unbounded. Workers dispatch follow-up steps from inside step
  // handling and must never wait on a queue only they drain.
  sender: mpsc::UnboundedSender<StepInvocation>,
  steps: Arc<StepRegistry>,
  task_results: Arc<dyn TaskResultStore>,
}

impl ChannelDispatcher {
  /// Create a dispatcher and the receiving end of its queue.
  pub fn new(
    steps: Arc<StepRegistry>,
    task_results: Arc<dyn TaskResultStore>,
  ) -> (Self, mpsc::UnboundedReceiver<StepInvocation>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
      Self {
        sender,
        steps,
        task_results,
      },
      receiver,
    )
  }
}

#[async_trait]
impl Dispatcher for ChannelDispatcher {
  async fn dispatch(&self, invocation: StepInvocation) -> Result<(), DispatchError> {
    if !self.steps.contains(&invocation.step) {
      return Err(DispatchError::UnknownStep {
        step: invocation.step,
      });
    }
    if self.sender.is_closed() {
      return Err(DispatchError::Closed);
    }

    self
      .task_results
      .save_task_result(&invocation.pending_result())
      .await?;

    debug!(
      step = %invocation.step,
      task_id = %invocation.task_id,
      execution_id = %invocation.execution_id,
      "enqueueing step"
    );
    self
      .sender
      .send(invocation)
      .map_err(|_| DispatchError::Closed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::StepError;
  use crate::step::{Step, StepContext, StepOutcome};
  use ingest_store::{IdEncodings, MemoryStore, TaskResultStore, TaskState};

  struct Noop;

  #[async_trait]
  impl Step for Noop {
    async fn run(&self, _ctx: &StepContext) -> Result<StepOutcome, StepError> {
      Ok(StepOutcome::Continue)
    }
  }

  fn invocation(step: &str) -> StepInvocation {
    StepInvocation::new(step, "e1", "gpkg", "import", None)
  }

  fn registry() -> Arc<StepRegistry> {
    let mut steps = StepRegistry::new();
    steps.register("import_resource", Arc::new(Noop));
    Arc::new(steps)
  }

  #[tokio::test]
  async fn test_dispatch_enqueues_known_step() {
    let store = Arc::new(MemoryStore::new());
    let (dispatcher, mut receiver) = ChannelDispatcher::new(registry(), store.clone());
    dispatcher.dispatch(invocation("import_resource")).await.unwrap();

    let received = receiver.recv().await.unwrap();
    assert_eq!(received.step, "import_resource");

    let results = store.task_results_for(&IdEncodings::new("e1")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].task_id, received.task_id);
    assert_eq!(results[0].status, TaskState::Pending);
  }

  #[tokio::test]
  async fn test_dispatch_rejects_unknown_step() {
    let store = Arc::new(MemoryStore::new());
    let (dispatcher, _receiver) = ChannelDispatcher::new(registry(), store.clone());
    let err = dispatcher.dispatch(invocation("reproject")).await.unwrap_err();
    assert!(matches!(err, DispatchError::UnknownStep { step } if step == "reproject"));

    let results = store.task_results_for(&IdEncodings::new("e1")).await.unwrap();
    assert!(results.is_empty());
  }

  #[tokio::test]
  async fn test_dispatch_after_receiver_dropped() {
    let store = Arc::new(MemoryStore::new());
    let (dispatcher, receiver) = ChannelDispatcher::new(registry(), store);
    drop(receiver);
    let err = dispatcher.dispatch(invocation("import_resource")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Closed));
  }
}
