//! In-memory store.
//!
//! Mirrors the SQLite semantics (conditional updates, fuzzy task result
//! lookup) without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;

use crate::{
  CompletionStore, Error, Execution, ExecutionStore, ExecutionUpdate, IdEncodings, LegacyUpload,
  LegacyUploadStore, SubResourceCompletion, TaskResult, TaskResultStore,
};

#[derive(Default)]
struct Tables {
  executions: HashMap<String, Execution>,
  task_results: Vec<TaskResult>,
  completions: Vec<SubResourceCompletion>,
  uploads: Vec<LegacyUpload>,
}

/// Store keeping every table behind one mutex.
#[derive(Clone, Default)]
pub struct MemoryStore {
  tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Tables> {
    self.tables.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Merge `patch` into `target` the way SQLite's `json_patch` does (RFC 7396):
/// a null removes the key, nested objects merge.
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
  let serde_json::Value::Object(patch) = patch else {
    *target = patch.clone();
    return;
  };
  if !target.is_object() {
    *target = serde_json::Value::Object(serde_json::Map::new());
  }
  if let serde_json::Value::Object(existing) = target {
    for (key, value) in patch {
      if value.is_null() {
        existing.remove(key);
      } else {
        merge_patch(existing.entry(key.clone()).or_insert(serde_json::Value::Null), value);
      }
    }
  }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error> {
    let mut tables = self.lock();
    tables
      .executions
      .insert(execution.exec_id.clone(), execution.clone());
    Ok(())
  }

  async fn get_execution(&self, exec_id: &str) -> Result<Execution, Error> {
    self
      .lock()
      .executions
      .get(exec_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("execution {exec_id}")))
  }

  async fn update_execution(&self, exec_id: &str, update: &ExecutionUpdate) -> Result<u64, Error> {
    let mut tables = self.lock();
    let Some(execution) = tables.executions.get_mut(exec_id) else {
      return Ok(0);
    };
    if !update.allowed_from().contains(&execution.status) {
      return Ok(0);
    }

    if let Some(status) = update.status {
      execution.status = status;
    }
    if let Some(step) = &update.step {
      execution.step = Some(step.clone());
    }
    if let Some(log) = &update.log {
      execution.log = Some(log.clone());
    }
    if let Some(finished) = update.finished {
      execution.finished = Some(finished);
    }
    if let Some(params) = &update.params {
      merge_patch(&mut execution.input_params.0, &serde_json::Value::Object(params.clone()));
    }
    execution.last_updated = Utc::now();

    Ok(1)
  }
}

#[async_trait]
impl TaskResultStore for MemoryStore {
  async fn save_task_result(&self, result: &TaskResult) -> Result<(), Error> {
    let mut tables = self.lock();
    match tables
      .task_results
      .iter_mut()
      .find(|existing| existing.task_id == result.task_id)
    {
      Some(existing) => {
        existing.status = result.status;
        existing.result = result.result.clone();
        existing.done = result.done;
      }
      None => tables.task_results.push(result.clone()),
    }
    Ok(())
  }

  async fn task_results_for(&self, encodings: &IdEncodings) -> Result<Vec<TaskResult>, Error> {
    Ok(
      self
        .lock()
        .task_results
        .iter()
        .filter(|r| {
          encodings.matches(&r.task_args)
            || encodings.matches(&r.task_kwargs)
            || r.result.as_deref().is_some_and(|text| encodings.matches(text))
        })
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl CompletionStore for MemoryStore {
  async fn record_completion(&self, completion: &SubResourceCompletion) -> Result<(), Error> {
    self.lock().completions.push(completion.clone());
    Ok(())
  }

  async fn count_completions(&self, execution_id: &str) -> Result<u64, Error> {
    Ok(
      self
        .lock()
        .completions
        .iter()
        .filter(|c| c.execution_id == execution_id)
        .count() as u64,
    )
  }

  async fn list_completions(&self, execution_id: &str) -> Result<Vec<SubResourceCompletion>, Error> {
    Ok(
      self
        .lock()
        .completions
        .iter()
        .filter(|c| c.execution_id == execution_id)
        .cloned()
        .collect(),
    )
  }
}

fn references(upload: &LegacyUpload, exec_id: &str) -> bool {
  upload.metadata.0.get("exec_id").and_then(|v| v.as_str()) == Some(exec_id)
}

#[async_trait]
impl LegacyUploadStore for MemoryStore {
  async fn create_upload(
    &self,
    state: &str,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<i64, Error> {
    let mut tables = self.lock();
    let id = tables.uploads.len() as i64 + 1;
    let now = Utc::now();
    tables.uploads.push(LegacyUpload {
      id,
      state: state.to_string(),
      metadata: Json(serde_json::Value::Object(metadata)),
      created: now,
      last_updated: now,
    });
    Ok(id)
  }

  async fn update_uploads(
    &self,
    exec_id: &str,
    state: Option<&str>,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<u64, Error> {
    let mut tables = self.lock();
    let mut affected = 0;
    for upload in tables.uploads.iter_mut().filter(|u| references(u, exec_id)) {
      if let Some(state) = state {
        upload.state = state.to_string();
      }
      upload.metadata = Json(serde_json::Value::Object(metadata.clone()));
      upload.last_updated = Utc::now();
      affected += 1;
    }
    Ok(affected)
  }

  async fn uploads_for(&self, exec_id: &str) -> Result<Vec<LegacyUpload>, Error> {
    Ok(
      self
        .lock()
        .uploads
        .iter()
        .filter(|u| references(u, exec_id))
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ExecutionStatus, NewExecution, TaskState};

  fn new_execution() -> Execution {
    NewExecution {
      func_name: "import".to_string(),
      action: "import".to_string(),
      ..NewExecution::default()
    }
    .into_execution(Utc::now())
  }

  #[tokio::test]
  async fn test_terminal_row_ignores_updates() {
    let store = MemoryStore::new();
    let execution = new_execution();
    store.create_execution(&execution).await.unwrap();

    let finished = ExecutionUpdate::status(ExecutionStatus::Finished);
    assert_eq!(store.update_execution(&execution.exec_id, &finished).await.unwrap(), 1);

    let failed = ExecutionUpdate::status(ExecutionStatus::Failed).with_log("late");
    assert_eq!(store.update_execution(&execution.exec_id, &failed).await.unwrap(), 0);

    let stored = store.get_execution(&execution.exec_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Finished);
    assert_eq!(stored.log, None);
  }

  #[tokio::test]
  async fn test_update_merges_params() {
    let store = MemoryStore::new();
    let mut execution = new_execution();
    execution.input_params = Json(serde_json::json!({ "total_layers": 2 }));
    store.create_execution(&execution).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("layer".to_string(), "roads".into());
    let update = ExecutionUpdate::step("import_resource").with_params(params);
    store.update_execution(&execution.exec_id, &update).await.unwrap();

    let stored = store.get_execution(&execution.exec_id).await.unwrap();
    assert_eq!(stored.input_params.0["total_layers"], 2);
    assert_eq!(stored.input_params.0["layer"], "roads");
    assert_eq!(stored.step.as_deref(), Some("import_resource"));
  }

  #[tokio::test]
  async fn test_null_param_removes_key() {
    let store = MemoryStore::new();
    let mut execution = new_execution();
    execution.input_params = Json(serde_json::json!({
      "total_layers": 2,
      "options": { "srid": 4326, "overwrite": true },
    }));
    store.create_execution(&execution).await.unwrap();

    let mut params = serde_json::Map::new();
    params.insert("total_layers".to_string(), serde_json::Value::Null);
    params.insert("options".to_string(), serde_json::json!({ "overwrite": null, "charset": "utf8" }));
    let update = ExecutionUpdate::step("import_resource").with_params(params);
    store.update_execution(&execution.exec_id, &update).await.unwrap();

    let stored = store.get_execution(&execution.exec_id).await.unwrap();
    assert_eq!(
      stored.input_params.0,
      serde_json::json!({ "options": { "srid": 4326, "charset": "utf8" } })
    );
  }

  #[tokio::test]
  async fn test_task_results_match_either_encoding() {
    let store = MemoryStore::new();
    let exec_id = "6e0c4e44-5a2b-4b8e-9d1f-0f6b3c2a1d00";
    let now = Utc::now();
    for (task_id, args) in [
      ("t1", format!(r#"["{exec_id}"]"#)),
      ("t2", format!(r#"["{}"]"#, exec_id.replace('-', "_").to_uppercase())),
      ("t3", r#"["someone-else"]"#.to_string()),
    ] {
      store
        .save_task_result(&TaskResult {
          task_id: task_id.to_string(),
          task_name: "import_resource".to_string(),
          status: TaskState::Success,
          task_args: args,
          task_kwargs: "{}".to_string(),
          result: None,
          created: now,
          done: Some(now),
        })
        .await
        .unwrap();
    }

    let found = store
      .task_results_for(&IdEncodings::new(exec_id))
      .await
      .unwrap();
    let ids: Vec<_> = found.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t2"]);
  }
}
