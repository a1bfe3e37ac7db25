use std::sync::Arc;

use chrono::Utc;
use ingest_dispatch::{Dispatcher, StepInvocation, UnitContext};
use ingest_handler::{HandlerRegistry, InputDescriptor};
use ingest_store::{
  Execution, ExecutionStatus, ExecutionUpdate, IdEncodings, NewExecution, Stores,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::progress::{ProgressSnapshot, Verdict, evaluate, total_units};

/// Log prefix that marks a failed execution in which some units completed.
pub const PARTIAL_FAILURE_PREFIX: &str = "partially failed";

/// Input parameter listing the units a submission fans out into.
pub const LAYERS_PARAM: &str = "layers";

/// Name of one `layers` entry: a plain string, or an object with a string
/// `name`.
pub fn layer_name(layer: &Value) -> Option<&str> {
  match layer {
    Value::String(name) => Some(name.as_str()),
    Value::Object(layer) => layer.get("name").and_then(Value::as_str),
    _ => None,
  }
}

/// A request to import one input.
#[derive(Debug, Clone)]
pub struct Submission {
  pub descriptor: InputDescriptor,
  pub action: String,
  pub user: Option<String>,
  pub resource: Option<String>,
  pub params: Map<String, Value>,
}

impl Submission {
  pub fn new(descriptor: InputDescriptor, action: impl Into<String>) -> Self {
    Self {
      descriptor,
      action: action.into(),
      user: None,
      resource: None,
      params: Map::new(),
    }
  }

  pub fn with_user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }

  pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
    self.resource = Some(resource.into());
    self
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.params.insert(key.into(), value.into());
    self
  }
}

/// Where `advance` left an execution.
enum Progression {
  Dispatched,
  Exhausted,
}

/// Drives executions through their handler's step sequence and reconciles
/// fan-out units into one terminal status.
///
/// The orchestrator never runs step work. It holds no per-execution state;
/// every decision is made from what the stores report, and every status
/// write is a single conditional update that leaves terminal rows alone.
pub struct Orchestrator<N: ExecutionNotifier = NoopNotifier> {
  config: OrchestratorConfig,
  stores: Stores,
  handlers: Arc<HandlerRegistry>,
  dispatcher: Arc<dyn Dispatcher>,
  notifier: N,
}

impl Orchestrator<NoopNotifier> {
  /// Create an orchestrator that discards execution events.
  pub fn new(
    config: OrchestratorConfig,
    stores: Stores,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
  ) -> Self {
    Self::with_notifier(config, stores, handlers, dispatcher, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Orchestrator<N> {
  /// Create an orchestrator reporting events to `notifier`.
  pub fn with_notifier(
    config: OrchestratorConfig,
    stores: Stores,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    notifier: N,
  ) -> Self {
    Self {
      config,
      stores,
      handlers,
      dispatcher,
      notifier,
    }
  }

  pub fn config(&self) -> &OrchestratorConfig {
    &self.config
  }

  pub fn stores(&self) -> &Stores {
    &self.stores
  }

  pub fn handlers(&self) -> &HandlerRegistry {
    &self.handlers
  }

  /// Read an execution. Fails with `ExecutionNotFound` when missing.
  pub async fn get_execution(&self, execution_id: &str) -> Result<Execution, OrchestratorError> {
    match self.stores.executions.get_execution(execution_id).await {
      Ok(execution) => Ok(execution),
      Err(ingest_store::Error::NotFound(_)) => Err(OrchestratorError::ExecutionNotFound {
        execution_id: execution_id.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  /// Persist a new execution in `CREATED` and return its identifier.
  #[instrument(skip(self, new), fields(func_name = %new.func_name, action = %new.action))]
  pub async fn create_execution(&self, new: NewExecution) -> Result<String, OrchestratorError> {
    let execution = new.into_execution(Utc::now());
    self.stores.executions.create_execution(&execution).await?;
    info!(execution_id = %execution.exec_id, "execution created");

    if self.config.enable_legacy_upload_status {
      let mut metadata = Map::new();
      metadata.insert("func_name".to_string(), execution.func_name.clone().into());
      metadata.insert(
        "step".to_string(),
        execution.step.clone().map_or(Value::Null, Value::from),
      );
      metadata.insert("exec_id".to_string(), execution.exec_id.clone().into());
      if let Value::Object(params) = &execution.input_params.0 {
        metadata.extend(params.clone());
      }
      if let Err(e) = self
        .stores
        .legacy_uploads
        .create_upload(ExecutionStatus::Running.as_str(), metadata)
        .await
      {
        warn!(execution_id = %execution.exec_id, error = %e, "failed to create legacy upload");
      }
    }

    self.notifier.notify(ExecutionEvent::Created {
      execution_id: execution.exec_id.clone(),
      action: execution.action.clone(),
    });
    Ok(execution.exec_id)
  }

  /// Resolve a handler for the input, create the execution at the first
  /// step of the action's sequence and dispatch the step after it.
  #[instrument(skip(self, submission), fields(action = %submission.action))]
  pub async fn submit(&self, submission: Submission) -> Result<String, OrchestratorError> {
    let Submission {
      descriptor,
      action,
      user,
      resource,
      params,
    } = submission;

    let handler = self.handlers.resolve(&descriptor).ok_or_else(|| {
      OrchestratorError::UnsupportedInput {
        input: describe(&descriptor),
      }
    })?;
    let unsupported = || OrchestratorError::ActionNotSupported {
      action: action.clone(),
      handler_id: handler.id().to_string(),
    };
    let sequence = handler.step_sequence(&action).ok_or_else(unsupported)?;
    let first = sequence.first().ok_or_else(unsupported)?.to_string();

    let mut input_params = descriptor.to_params();
    input_params.extend(params);
    // Every layer must become a fan-out unit, or the execution never settles.
    if let Some(Value::Array(layers)) = input_params.get(LAYERS_PARAM) {
      if let Some(index) = layers.iter().position(|layer| layer_name(layer).is_none()) {
        return Err(OrchestratorError::UnnamedLayer { index });
      }
    }
    if !input_params.contains_key(&self.config.total_units_key) {
      let total = match input_params.get(LAYERS_PARAM) {
        Some(Value::Array(layers)) => layers.len(),
        _ => 1,
      };
      input_params.insert(self.config.total_units_key.clone(), total.into());
    }

    let execution_id = self
      .create_execution(NewExecution {
        user,
        func_name: first.clone(),
        step: Some(first),
        action: action.clone(),
        source: Some(handler.id().to_string()),
        resource,
        input_params,
      })
      .await?;

    self
      .advance(&execution_id, &action, handler.id(), None, None)
      .await?;
    Ok(execution_id)
  }

  /// Apply `update` to the execution and mirror it to the legacy uploads.
  ///
  /// Returns the number of rows changed; `0` means the execution is missing
  /// or already terminal.
  pub async fn update_execution_status(
    &self,
    execution_id: &str,
    update: ExecutionUpdate,
  ) -> Result<u64, OrchestratorError> {
    let affected = self
      .stores
      .executions
      .update_execution(execution_id, &update)
      .await?;
    if affected == 0 {
      warn!(
        execution_id = %execution_id,
        status = ?update.status,
        "execution update skipped, row missing or already settled"
      );
      return Ok(0);
    }

    if self.config.enable_legacy_upload_status {
      let state = update.status.map(ExecutionStatus::as_str);
      if let Err(e) = self
        .stores
        .legacy_uploads
        .update_uploads(execution_id, state, update.to_metadata(execution_id))
        .await
      {
        warn!(execution_id = %execution_id, error = %e, "failed to mirror legacy upload");
      }
    }
    Ok(affected)
  }

  /// Record `step` as the last step started for the execution.
  pub async fn record_step(&self, execution_id: &str, step: &str) -> Result<u64, OrchestratorError> {
    self
      .update_execution_status(execution_id, ExecutionUpdate::step(step))
      .await
  }

  /// Move the execution to `FAILED`, keeping `log` as the reason.
  pub async fn set_as_failed(
    &self,
    execution_id: &str,
    log: Option<&str>,
  ) -> Result<u64, OrchestratorError> {
    let mut update = ExecutionUpdate::status(ExecutionStatus::Failed).with_finished(Utc::now());
    if let Some(log) = log {
      update = update.with_log(log);
    }
    let affected = self.update_execution_status(execution_id, update).await?;
    if affected > 0 {
      error!(execution_id = %execution_id, log = ?log, "execution failed");
      self.notifier.notify(ExecutionEvent::Failed {
        execution_id: execution_id.to_string(),
        log: log.map(str::to_string),
        partial: false,
      });
    }
    Ok(affected)
  }

  /// Move the execution to `FAILED` with a log naming the units that did
  /// not import.
  pub async fn set_as_partially_failed(
    &self,
    execution_id: &str,
    reason: Option<&str>,
  ) -> Result<u64, OrchestratorError> {
    let log = format!(
      "{PARTIAL_FAILURE_PREFIX}: the execution is completed, but the following layers are not correctly imported: {}",
      reason.unwrap_or("unknown")
    );
    let update = ExecutionUpdate::status(ExecutionStatus::Failed)
      .with_finished(Utc::now())
      .with_log(log.clone());
    let affected = self.update_execution_status(execution_id, update).await?;
    if affected > 0 {
      warn!(execution_id = %execution_id, log = %log, "execution partially failed");
      self.notifier.notify(ExecutionEvent::Failed {
        execution_id: execution_id.to_string(),
        log: Some(log),
        partial: true,
      });
    }
    Ok(affected)
  }

  async fn set_as_finished(&self, execution_id: &str) -> Result<u64, OrchestratorError> {
    let update = ExecutionUpdate::status(ExecutionStatus::Finished).with_finished(Utc::now());
    let affected = self.update_execution_status(execution_id, update).await?;
    if affected > 0 {
      info!(execution_id = %execution_id, "execution finished");
      self.notifier.notify(ExecutionEvent::Finished {
        execution_id: execution_id.to_string(),
      });
    }
    Ok(affected)
  }

  /// Dispatch the step after `step` (or after the execution's stored step).
  ///
  /// Returns the execution id when a step was dispatched, or `None` when the
  /// sequence is exhausted and the execution was handed to
  /// [`evaluate_progress`](Self::evaluate_progress). Any other failure marks
  /// the execution `FAILED` and is returned.
  #[instrument(skip(self, unit), fields(unit = ?unit.map(|u| &u.name)))]
  pub async fn advance(
    &self,
    execution_id: &str,
    action: &str,
    handler_id: &str,
    step: Option<&str>,
    unit: Option<&UnitContext>,
  ) -> Result<Option<String>, OrchestratorError> {
    let execution = self.get_execution(execution_id).await?;

    match self
      .dispatch_next(&execution, action, handler_id, step, unit)
      .await
    {
      Ok(Progression::Dispatched) => Ok(Some(execution.exec_id)),
      Ok(Progression::Exhausted) => {
        debug!("step sequence exhausted");
        self
          .evaluate_progress(execution_id, None, Some(handler_id))
          .await?;
        Ok(None)
      }
      Err(e) => {
        error!(error = %e, "failed to advance execution");
        let log = e.to_string();
        if let Err(mark) = self.set_as_failed(execution_id, Some(log.as_str())).await {
          error!(error = %mark, "failed to mark execution as failed");
        }
        Err(e)
      }
    }
  }

  async fn dispatch_next(
    &self,
    execution: &Execution,
    action: &str,
    handler_id: &str,
    step: Option<&str>,
    unit: Option<&UnitContext>,
  ) -> Result<Progression, OrchestratorError> {
    let handler = self.handlers.load(handler_id)?;
    let sequence = handler.step_sequence(action).ok_or_else(|| {
      OrchestratorError::ActionNotSupported {
        action: action.to_string(),
        handler_id: handler_id.to_string(),
      }
    })?;

    let current = step.or(execution.step.as_deref()).unwrap_or_default();
    let position = sequence
      .position(current)
      .ok_or_else(|| OrchestratorError::StepNotInSequence {
        step: current.to_string(),
        action: action.to_string(),
        handler_id: handler_id.to_string(),
      })?;
    let next_index = position + 1;

    if next_index == 1 {
      self
        .update_execution_status(
          &execution.exec_id,
          ExecutionUpdate::status(ExecutionStatus::Running),
        )
        .await?;
    }

    let Some(next) = sequence.remaining_from(next_index).first() else {
      return Ok(Progression::Exhausted);
    };

    let invocation = StepInvocation::new(
      next.clone(),
      execution.exec_id.clone(),
      handler_id,
      action,
      unit.cloned(),
    );
    self.dispatcher.dispatch(invocation).await?;

    info!(step = %next, "step dispatched");
    self.notifier.notify(ExecutionEvent::StepDispatched {
      execution_id: execution.exec_id.clone(),
      step: next.clone(),
      unit: unit.map(|u| u.name.clone()),
    });
    Ok(Progression::Dispatched)
  }

  /// Reconcile the execution's units into a terminal status when possible.
  ///
  /// Safe to call any number of times, from any number of workers: a
  /// terminal execution is left untouched and reported as
  /// [`Verdict::Settled`].
  #[instrument(skip(self, diagnostic))]
  pub async fn evaluate_progress(
    &self,
    execution_id: &str,
    diagnostic: Option<&str>,
    handler_id: Option<&str>,
  ) -> Result<Verdict, OrchestratorError> {
    let execution = self.get_execution(execution_id).await?;
    if execution.status.is_terminal() {
      debug!(status = %execution.status, "execution already settled");
      return Ok(Verdict::Settled);
    }

    let expected = total_units(&execution.input_params.0, &self.config.total_units_key);
    let actual = self.stores.completions.count_completions(execution_id).await?;
    let results = self
      .stores
      .task_results
      .task_results_for(&IdEncodings::new(execution_id))
      .await?;
    let snapshot = ProgressSnapshot::from_results(expected, actual, &results);
    let verdict = evaluate(&snapshot, diagnostic, &self.config.error_marker);
    debug!(
      expected = snapshot.expected,
      actual = snapshot.actual,
      in_flight = snapshot.in_flight,
      failures = snapshot.failures,
      verdict = ?verdict,
      "evaluated execution progress"
    );
    if verdict.is_terminal() {
      info!(verdict = ?verdict, "settling execution");
    }

    match verdict {
      Verdict::InFlight | Verdict::Waiting | Verdict::Settled => {}
      Verdict::PartiallyFailed => {
        let reason = snapshot.reason(diagnostic);
        self
          .set_as_partially_failed(execution_id, reason.as_deref())
          .await?;
      }
      Verdict::Failed => {
        let reason = snapshot.reason(diagnostic);
        self.set_as_failed(execution_id, reason.as_deref()).await?;
      }
      Verdict::Finished => {
        if let Some(handler_id) = handler_id {
          if let Err(log) = self.run_completion_hook(execution_id, handler_id).await {
            self.set_as_failed(execution_id, Some(log.as_str())).await?;
            return Ok(Verdict::Failed);
          }
        }
        self.set_as_finished(execution_id).await?;
      }
    }
    Ok(verdict)
  }

  async fn run_completion_hook(&self, execution_id: &str, handler_id: &str) -> Result<(), String> {
    let handler = self.handlers.load(handler_id).map_err(|e| e.to_string())?;
    handler
      .on_execution_complete(execution_id)
      .await
      .map_err(|e| {
        error!(handler_id = %handler_id, error = %e, "completion hook failed");
        format!("completion hook of handler '{handler_id}' failed: {e}")
      })
  }
}

fn describe(descriptor: &InputDescriptor) -> String {
  match &descriptor.base_file {
    Some(path) => path.display().to_string(),
    None => "input without a base file".to_string(),
  }
}
