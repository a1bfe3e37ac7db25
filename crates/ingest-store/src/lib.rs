//! Ingest Store
//!
//! This crate provides the storage traits and implementations used by the
//! import orchestrator. Data is persisted to SQLite, or kept in memory for
//! tests and embedding.
//!
//! The traits cover:
//! - [`ExecutionStore`]: one row per import job (create/read/conditional update)
//! - [`TaskResultStore`]: outcome of every dispatched step, searched by execution id
//! - [`CompletionStore`]: one row per finished fan-out unit
//! - [`LegacyUploadStore`]: shadow upload records for older clients

mod encoding;
mod memory;
mod sqlite;
mod types;

use std::sync::Arc;

pub use encoding::IdEncodings;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  Execution, ExecutionStatus, ExecutionUpdate, LegacyUpload, NewExecution, SubResourceCompletion,
  TaskResult, TaskState,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A JSON column could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Storage for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
  /// Persist a new execution row.
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error>;

  /// Get an execution by id. Returns `Error::NotFound` when missing.
  async fn get_execution(&self, exec_id: &str) -> Result<Execution, Error>;

  /// Apply `update` in a single conditional write.
  ///
  /// The write only lands when the row's current status is one of
  /// `update.allowed_from()`. Returns the number of affected rows, so `0`
  /// means the row is missing or already terminal.
  async fn update_execution(&self, exec_id: &str, update: &ExecutionUpdate) -> Result<u64, Error>;
}

/// Storage for dispatched step outcomes.
#[async_trait]
pub trait TaskResultStore: Send + Sync {
  /// Insert or replace a task result keyed by `task_id`.
  async fn save_task_result(&self, result: &TaskResult) -> Result<(), Error>;

  /// Every task result whose args, kwargs or result text mention the
  /// execution id in either encoding.
  async fn task_results_for(&self, encodings: &IdEncodings) -> Result<Vec<TaskResult>, Error>;
}

/// Storage for completed fan-out units.
#[async_trait]
pub trait CompletionStore: Send + Sync {
  /// Record one finished unit.
  async fn record_completion(&self, completion: &SubResourceCompletion) -> Result<(), Error>;

  /// Number of finished units for an execution.
  async fn count_completions(&self, execution_id: &str) -> Result<u64, Error>;

  /// List finished units for an execution, oldest first.
  async fn list_completions(&self, execution_id: &str) -> Result<Vec<SubResourceCompletion>, Error>;
}

/// Storage for the legacy upload mirror.
#[async_trait]
pub trait LegacyUploadStore: Send + Sync {
  /// Create a shadow upload record.
  async fn create_upload(
    &self,
    state: &str,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<i64, Error>;

  /// Replace metadata, and state when given, of every upload whose metadata
  /// references `exec_id`. Returns the number of affected records.
  async fn update_uploads(
    &self,
    exec_id: &str,
    state: Option<&str>,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<u64, Error>;

  /// Uploads referencing `exec_id`.
  async fn uploads_for(&self, exec_id: &str) -> Result<Vec<LegacyUpload>, Error>;
}

/// Handles to every store the orchestrator reads or writes.
#[derive(Clone)]
pub struct Stores {
  pub executions: Arc<dyn ExecutionStore>,
  pub task_results: Arc<dyn TaskResultStore>,
  pub completions: Arc<dyn CompletionStore>,
  pub legacy_uploads: Arc<dyn LegacyUploadStore>,
}

impl Stores {
  /// Use one backend for every store.
  pub fn shared<S>(store: Arc<S>) -> Self
  where
    S: ExecutionStore + TaskResultStore + CompletionStore + LegacyUploadStore + 'static,
  {
    Self {
      executions: store.clone(),
      task_results: store.clone(),
      completions: store.clone(),
      legacy_uploads: store,
    }
  }
}
