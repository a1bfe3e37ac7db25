//! Worker pool consuming dispatched step invocations.
//!
//! The `WorkerRunner` owns the receiving end of the dispatch channel and
//! runs each invocation on its own task, bounded by a semaphore.

use std::sync::Arc;

use chrono::Utc;
use ingest_dispatch::{StepContext, StepInvocation, StepOutcome, StepRegistry};
use ingest_orchestrator::{ExecutionNotifier, NoopNotifier, Orchestrator};
use ingest_store::TaskState;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Runs single invocations: executes the step, settles its task result and
/// hands the execution back to the orchestrator.
pub struct StepWorker<N: ExecutionNotifier = NoopNotifier> {
  steps: Arc<StepRegistry>,
  orchestrator: Arc<Orchestrator<N>>,
}

impl<N: ExecutionNotifier> Clone for StepWorker<N> {
  fn clone(&self) -> Self {
    Self {
      steps: self.steps.clone(),
      orchestrator: self.orchestrator.clone(),
    }
  }
}

impl<N: ExecutionNotifier> StepWorker<N> {
  pub fn new(steps: Arc<StepRegistry>, orchestrator: Arc<Orchestrator<N>>) -> Self {
    Self {
      steps,
      orchestrator,
    }
  }

  pub fn orchestrator(&self) -> &Arc<Orchestrator<N>> {
    &self.orchestrator
  }

  /// Process one invocation to the end.
  ///
  /// On success the execution is advanced, once per fan-out unit when the
  /// step fanned out. A failed unit step triggers reconciliation with the
  /// error as diagnostic; a failed execution-wide step fails the execution.
  #[instrument(
    skip(self, invocation),
    fields(
      execution_id = %invocation.execution_id,
      step = %invocation.step,
      task_id = %invocation.task_id,
    )
  )]
  pub async fn process(&self, invocation: StepInvocation) -> Result<(), WorkerError> {
    let Some(step) = self.steps.get(&invocation.step) else {
      let message = format!("unknown step: {}", invocation.step);
      self.settle(&invocation, TaskState::Failure, Some(message.clone())).await?;
      self
        .orchestrator
        .set_as_failed(&invocation.execution_id, Some(message.as_str()))
        .await?;
      return Err(WorkerError::UnknownStep {
        step: invocation.step,
      });
    };

    let execution = match self.orchestrator.get_execution(&invocation.execution_id).await {
      Ok(execution) => execution,
      Err(e) => {
        self.settle(&invocation, TaskState::Failure, Some(e.to_string())).await?;
        return Err(e.into());
      }
    };

    self
      .orchestrator
      .record_step(&execution.exec_id, &invocation.step)
      .await?;

    let ctx = StepContext {
      invocation,
      execution,
      stores: self.orchestrator.stores().clone(),
    };
    let outcome = step.run(&ctx).await;
    let StepContext { invocation, .. } = ctx;

    match outcome {
      Ok(outcome) => {
        self
          .settle(&invocation, TaskState::Success, Some(describe(&outcome)))
          .await?;
        info!("step succeeded");
        self.follow_up(&invocation, outcome).await
      }
      Err(e) => {
        error!(error = %e, "step failed");
        let diagnostic = match &invocation.unit {
          Some(unit) => format!("{}: {}", unit.name, e.message),
          None => e.message.clone(),
        };
        self
          .settle(&invocation, TaskState::Failure, Some(diagnostic.clone()))
          .await?;

        if invocation.unit.is_some() {
          self
            .orchestrator
            .evaluate_progress(
              &invocation.execution_id,
              Some(diagnostic.as_str()),
              Some(invocation.handler_id.as_str()),
            )
            .await?;
        } else {
          self
            .orchestrator
            .set_as_failed(&invocation.execution_id, Some(diagnostic.as_str()))
            .await?;
        }
        Err(WorkerError::StepFailed {
          step: invocation.step,
          message: e.message,
        })
      }
    }
  }

  async fn follow_up(
    &self,
    invocation: &StepInvocation,
    outcome: StepOutcome,
  ) -> Result<(), WorkerError> {
    let StepInvocation {
      execution_id,
      handler_id,
      action,
      step,
      ..
    } = invocation;

    match outcome {
      StepOutcome::Continue => {
        self
          .orchestrator
          .advance(execution_id, action, handler_id, Some(step.as_str()), invocation.unit.as_ref())
          .await?;
      }
      StepOutcome::FanOut(units) if units.is_empty() => {
        self
          .orchestrator
          .evaluate_progress(execution_id, None, Some(handler_id.as_str()))
          .await?;
      }
      StepOutcome::FanOut(units) => {
        for unit in &units {
          self
            .orchestrator
            .advance(execution_id, action, handler_id, Some(step.as_str()), Some(unit))
            .await?;
        }
      }
    }
    Ok(())
  }

  async fn settle(
    &self,
    invocation: &StepInvocation,
    status: TaskState,
    result: Option<String>,
  ) -> Result<(), WorkerError> {
    let mut task = invocation.pending_result();
    task.status = status;
    task.result = result;
    task.done = Some(Utc::now());
    self
      .orchestrator
      .stores()
      .task_results
      .save_task_result(&task)
      .await?;
    Ok(())
  }
}

fn describe(outcome: &StepOutcome) -> String {
  match outcome {
    StepOutcome::Continue => "ok".to_string(),
    StepOutcome::FanOut(units) => serde_json::Value::from(
      units
        .iter()
        .map(|u| u.alternate.clone())
        .collect::<Vec<_>>(),
    )
    .to_string(),
  }
}

/// A pool of workers fed by the dispatch channel.
///
/// # Usage
///
/// ```ignore
/// let (dispatcher, receiver) = ChannelDispatcher::new(steps.clone(), store.clone());
/// let orchestrator = Arc::new(Orchestrator::new(config, stores, handlers, Arc::new(dispatcher)));
/// let runner = WorkerRunner::new(WorkerConfig::default(), receiver, steps, orchestrator);
///
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct WorkerRunner<N: ExecutionNotifier = NoopNotifier> {
  config: WorkerConfig,
  receiver: mpsc::UnboundedReceiver<StepInvocation>,
  worker: StepWorker<N>,
}

impl<N: ExecutionNotifier + 'static> WorkerRunner<N> {
  pub fn new(
    config: WorkerConfig,
    receiver: mpsc::UnboundedReceiver<StepInvocation>,
    steps: Arc<StepRegistry>,
    orchestrator: Arc<Orchestrator<N>>,
  ) -> Self {
    Self {
      config,
      receiver,
      worker: StepWorker::new(steps, orchestrator),
    }
  }

  /// Start the processing loop.
  ///
  /// Runs until the cancellation token is triggered, which aborts steps in
  /// flight, or the channel closes, which lets them finish.
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
    let concurrency = self.config.concurrency.max(1);
    info!(concurrency, "starting worker runner");

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(in_flight = tasks.len(), "worker runner cancelled");
          tasks.shutdown().await;
          return Ok(());
        }
        invocation = self.receiver.recv() => {
          match invocation {
            Some(invocation) => {
              let worker = self.worker.clone();
              let semaphore = semaphore.clone();
              tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                  Ok(permit) => permit,
                  Err(_) => {
                    error!(task_id = %invocation.task_id, "worker semaphore closed");
                    return;
                  }
                };
                if let Err(e) = worker.process(invocation).await {
                  warn!(error = %e, "invocation ended with an error");
                }
              });
            }
            None => {
              info!("worker runner channel closed");
              break;
            }
          }
        }
        Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
          if let Err(e) = joined {
            error!(error = %e, "step task panicked");
          }
        }
      }
    }

    while let Some(joined) = tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "step task panicked");
      }
    }
    Ok(())
  }
}
