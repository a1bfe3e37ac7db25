use chrono::Utc;
use ingest_store::{TaskResult, TaskState};
use serde::{Deserialize, Serialize};

/// Identity of one fan-out unit (e.g. a layer) inside an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitContext {
  /// Unit name as found in the input, e.g. the layer name.
  pub name: String,
  /// Alternate name the unit is published under.
  pub alternate: String,
}

impl UnitContext {
  pub fn new(name: impl Into<String>, alternate: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      alternate: alternate.into(),
    }
  }
}

/// One queued step call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInvocation {
  /// Identifier of the task result row tracking this call.
  pub task_id: String,
  pub step: String,
  pub execution_id: String,
  pub handler_id: String,
  pub action: String,
  pub unit: Option<UnitContext>,
}

impl StepInvocation {
  /// A new invocation with a fresh task id.
  pub fn new(
    step: impl Into<String>,
    execution_id: impl Into<String>,
    handler_id: impl Into<String>,
    action: impl Into<String>,
    unit: Option<UnitContext>,
  ) -> Self {
    Self {
      task_id: uuid::Uuid::new_v4().to_string(),
      step: step.into(),
      execution_id: execution_id.into(),
      handler_id: handler_id.into(),
      action: action.into(),
      unit,
    }
  }

  /// Positional arguments as seen by the worker.
  ///
  /// Execution-wide steps get `(execution_id, handler_id, action)`.
  /// Unit-scoped steps carry `(step, unit_name, unit_alternate)` in front so
  /// concurrent units of one execution can be told apart.
  pub fn args(&self) -> Vec<serde_json::Value> {
    let mut args = Vec::with_capacity(6);
    if let Some(unit) = &self.unit {
      args.push(self.step.clone().into());
      args.push(unit.name.clone().into());
      args.push(unit.alternate.clone().into());
    }
    args.push(self.execution_id.clone().into());
    args.push(self.handler_id.clone().into());
    args.push(self.action.clone().into());
    args
  }

  /// Keyword arguments as seen by the worker.
  pub fn kwargs(&self) -> serde_json::Map<String, serde_json::Value> {
    let mut kwargs = serde_json::Map::new();
    kwargs.insert("step".to_string(), self.step.clone().into());
    if let Some(unit) = &self.unit {
      kwargs.insert("layer_name".to_string(), unit.name.clone().into());
      kwargs.insert("alternate".to_string(), unit.alternate.clone().into());
    }
    kwargs
  }

  /// Serialized positional arguments, as stored with task results.
  pub fn args_text(&self) -> String {
    serde_json::Value::Array(self.args()).to_string()
  }

  /// Serialized keyword arguments, as stored with task results.
  pub fn kwargs_text(&self) -> String {
    serde_json::Value::Object(self.kwargs()).to_string()
  }

  /// The task result row written when this invocation is queued.
  pub fn pending_result(&self) -> TaskResult {
    TaskResult {
      task_id: self.task_id.clone(),
      task_name: self.step.clone(),
      status: TaskState::Pending,
      task_args: self.args_text(),
      task_kwargs: self.kwargs_text(),
      result: None,
      created: Utc::now(),
      done: None,
    }
  }
}
