use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Created,
  Running,
  Failed,
  Finished,
}

impl ExecutionStatus {
  pub const ALL: [ExecutionStatus; 4] = [
    ExecutionStatus::Created,
    ExecutionStatus::Running,
    ExecutionStatus::Failed,
    ExecutionStatus::Finished,
  ];

  /// `Failed` and `Finished` are never left once entered.
  pub fn is_terminal(self) -> bool {
    matches!(self, ExecutionStatus::Failed | ExecutionStatus::Finished)
  }

  /// Whether a row currently in `self` may be written with `next`.
  ///
  /// Writing the same non-terminal status again is allowed so repeated
  /// transitions stay idempotent. Nothing moves back to `Created`.
  pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
    match (self, next) {
      (_, ExecutionStatus::Created) => self == ExecutionStatus::Created,
      (current, _) => !current.is_terminal(),
    }
  }

  /// Statuses a row may currently hold for a write of `next` to apply.
  pub fn predecessors(next: ExecutionStatus) -> Vec<ExecutionStatus> {
    Self::ALL
      .into_iter()
      .filter(|current| current.can_transition_to(next))
      .collect()
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ExecutionStatus::Created => "created",
      ExecutionStatus::Running => "running",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Finished => "finished",
    }
  }
}

impl std::fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Outcome of one dispatched step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
  Pending,
  Success,
  Failure,
}

impl TaskState {
  /// Success and failure are the only settled states.
  pub fn is_ready(self) -> bool {
    matches!(self, TaskState::Success | TaskState::Failure)
  }
}

/// An execution as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Execution {
  pub exec_id: String,
  pub user: Option<String>,
  pub func_name: String,
  pub step: Option<String>,
  pub status: ExecutionStatus,
  pub action: String,
  pub source: Option<String>,
  pub resource: Option<String>,
  pub input_params: Json<serde_json::Value>,
  pub log: Option<String>,
  pub created: DateTime<Utc>,
  pub last_updated: DateTime<Utc>,
  pub finished: Option<DateTime<Utc>>,
}

impl Execution {
  /// Look up a single input parameter.
  pub fn input_param(&self, key: &str) -> Option<&serde_json::Value> {
    self.input_params.0.get(key)
  }
}

/// Fields supplied when creating an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExecution {
  pub user: Option<String>,
  pub func_name: String,
  pub step: Option<String>,
  pub action: String,
  pub source: Option<String>,
  pub resource: Option<String>,
  pub input_params: serde_json::Map<String, serde_json::Value>,
}

impl NewExecution {
  /// Materialize the row with a fresh identifier.
  pub fn into_execution(self, now: DateTime<Utc>) -> Execution {
    Execution {
      exec_id: uuid::Uuid::new_v4().to_string(),
      user: self.user,
      func_name: self.func_name,
      step: self.step,
      status: ExecutionStatus::Created,
      action: self.action,
      source: self.source,
      resource: self.resource,
      input_params: Json(serde_json::Value::Object(self.input_params)),
      log: None,
      created: now,
      last_updated: now,
      finished: None,
    }
  }
}

/// A partial update of an execution row.
///
/// Every field left as `None` keeps its stored value. `params` is merged
/// into `input_params` key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUpdate {
  pub status: Option<ExecutionStatus>,
  pub step: Option<String>,
  pub log: Option<String>,
  pub finished: Option<DateTime<Utc>>,
  pub params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ExecutionUpdate {
  pub fn status(status: ExecutionStatus) -> Self {
    Self {
      status: Some(status),
      ..Self::default()
    }
  }

  pub fn step(step: impl Into<String>) -> Self {
    Self {
      step: Some(step.into()),
      ..Self::default()
    }
  }

  pub fn with_log(mut self, log: impl Into<String>) -> Self {
    self.log = Some(log.into());
    self
  }

  pub fn with_finished(mut self, finished: DateTime<Utc>) -> Self {
    self.finished = Some(finished);
    self
  }

  pub fn with_params(mut self, params: serde_json::Map<String, serde_json::Value>) -> Self {
    self.params = Some(params);
    self
  }

  /// The statuses a row may hold for this update to apply.
  pub fn allowed_from(&self) -> Vec<ExecutionStatus> {
    match self.status {
      Some(next) => ExecutionStatus::predecessors(next),
      None => ExecutionStatus::ALL
        .into_iter()
        .filter(|s| !s.is_terminal())
        .collect(),
    }
  }

  /// Flatten the update into the metadata blob mirrored to legacy uploads.
  pub fn to_metadata(&self, exec_id: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut metadata = self.params.clone().unwrap_or_default();
    if let Some(step) = &self.step {
      metadata.insert("step".to_string(), step.clone().into());
    }
    if let Some(log) = &self.log {
      metadata.insert("log".to_string(), log.clone().into());
    }
    if let Some(finished) = &self.finished {
      metadata.insert("finished".to_string(), finished.to_rfc3339().into());
    }
    metadata.insert("exec_id".to_string(), exec_id.into());
    metadata
  }
}

/// The stored outcome of a dispatched step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaskResult {
  pub task_id: String,
  pub task_name: String,
  pub status: TaskState,
  pub task_args: String,
  pub task_kwargs: String,
  pub result: Option<String>,
  pub created: DateTime<Utc>,
  pub done: Option<DateTime<Utc>>,
}

/// A fan-out unit (e.g. one layer) that finished all of its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubResourceCompletion {
  pub id: String,
  pub execution_id: String,
  pub resource_name: String,
  pub handler_id: Option<String>,
  pub created: DateTime<Utc>,
}

impl SubResourceCompletion {
  pub fn new(
    execution_id: impl Into<String>,
    resource_name: impl Into<String>,
    handler_id: Option<String>,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      execution_id: execution_id.into(),
      resource_name: resource_name.into(),
      handler_id,
      created: Utc::now(),
    }
  }
}

/// Shadow record kept for clients still reading the old upload table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LegacyUpload {
  pub id: i64,
  pub state: String,
  pub metadata: Json<serde_json::Value>,
  pub created: DateTime<Utc>,
  pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_terminal_statuses_are_never_left() {
    for next in ExecutionStatus::ALL {
      assert!(!ExecutionStatus::Failed.can_transition_to(next));
      assert!(!ExecutionStatus::Finished.can_transition_to(next));
    }
  }

  #[test]
  fn test_running_is_idempotent() {
    assert!(ExecutionStatus::Created.can_transition_to(ExecutionStatus::Running));
    assert!(ExecutionStatus::Running.can_transition_to(ExecutionStatus::Running));
    assert!(!ExecutionStatus::Running.can_transition_to(ExecutionStatus::Created));
  }

  #[test]
  fn test_predecessors_of_finished() {
    assert_eq!(
      ExecutionStatus::predecessors(ExecutionStatus::Finished),
      vec![ExecutionStatus::Created, ExecutionStatus::Running]
    );
  }

  #[test]
  fn test_step_only_update_skips_terminal_rows() {
    let update = ExecutionUpdate::step("publish_resource");
    assert_eq!(
      update.allowed_from(),
      vec![ExecutionStatus::Created, ExecutionStatus::Running]
    );
  }

  #[test]
  fn test_update_metadata_carries_exec_id() {
    let update = ExecutionUpdate::status(ExecutionStatus::Failed).with_log("boom");
    let metadata = update.to_metadata("abc");
    assert_eq!(metadata["exec_id"], "abc");
    assert_eq!(metadata["log"], "boom");
  }
}
