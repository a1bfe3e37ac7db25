use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;

use crate::{
  CompletionStore, Error, Execution, ExecutionStore, ExecutionUpdate, IdEncodings, LegacyUpload,
  LegacyUploadStore, SubResourceCompletion, TaskResult, TaskResultStore,
};

const EXECUTION_COLUMNS: &str = "exec_id, user, func_name, step, status, action, source, resource, \
   input_params, log, created, last_updated, finished";

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    // Several workers write at once.
    let options = SqliteConnectOptions::from_str(url)?
      .create_if_missing(true)
      .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await.map_err(sqlx::Error::from)?;
    Ok(store)
  }

  /// A migrated private in-memory database.
  ///
  /// Every connection to `sqlite::memory:` sees its own database, so the
  /// pool is capped at a single connection.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await.map_err(sqlx::Error::from)?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error> {
    sqlx::query(&format!(
      "INSERT INTO executions ({EXECUTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&execution.exec_id)
    .bind(&execution.user)
    .bind(&execution.func_name)
    .bind(&execution.step)
    .bind(execution.status)
    .bind(&execution.action)
    .bind(&execution.source)
    .bind(&execution.resource)
    .bind(&execution.input_params)
    .bind(&execution.log)
    .bind(execution.created)
    .bind(execution.last_updated)
    .bind(execution.finished)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_execution(&self, exec_id: &str) -> Result<Execution, Error> {
    sqlx::query_as(&format!(
      "SELECT {EXECUTION_COLUMNS} FROM executions WHERE exec_id = ?"
    ))
    .bind(exec_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("execution {exec_id}")))
  }

  async fn update_execution(&self, exec_id: &str, update: &ExecutionUpdate) -> Result<u64, Error> {
    // Status names come from the enum, never from callers.
    let allowed = update
      .allowed_from()
      .iter()
      .map(|s| format!("'{}'", s.as_str()))
      .collect::<Vec<_>>()
      .join(", ");

    let params = update
      .params
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;

    let result = sqlx::query(&format!(
      r#"
            UPDATE executions
            SET status = COALESCE(?, status),
                step = COALESCE(?, step),
                log = COALESCE(?, log),
                finished = COALESCE(?, finished),
                input_params = json_patch(input_params, COALESCE(?, '{{}}')),
                last_updated = ?
            WHERE exec_id = ? AND status IN ({allowed})
            "#
    ))
    .bind(update.status)
    .bind(&update.step)
    .bind(&update.log)
    .bind(update.finished)
    .bind(params)
    .bind(Utc::now())
    .bind(exec_id)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }
}

#[async_trait]
impl TaskResultStore for SqliteStore {
  async fn save_task_result(&self, result: &TaskResult) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO task_results (task_id, task_name, status, task_args, task_kwargs, result, created, done)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                status = excluded.status,
                result = excluded.result,
                done = excluded.done
            "#,
    )
    .bind(&result.task_id)
    .bind(&result.task_name)
    .bind(result.status)
    .bind(&result.task_args)
    .bind(&result.task_kwargs)
    .bind(&result.result)
    .bind(result.created)
    .bind(result.done)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn task_results_for(&self, encodings: &IdEncodings) -> Result<Vec<TaskResult>, Error> {
    // instr() rather than LIKE: '_' is a LIKE wildcard.
    sqlx::query_as(
      r#"
            SELECT task_id, task_name, status, task_args, task_kwargs, result, created, done
            FROM task_results
            WHERE instr(lower(task_args), ?1) > 0
               OR instr(lower(task_kwargs), ?1) > 0
               OR instr(lower(COALESCE(result, '')), ?1) > 0
               OR instr(lower(task_args), ?2) > 0
               OR instr(lower(task_kwargs), ?2) > 0
               OR instr(lower(COALESCE(result, '')), ?2) > 0
            ORDER BY created ASC
            "#,
    )
    .bind(encodings.raw().to_lowercase())
    .bind(encodings.normalized())
    .fetch_all(&self.pool)
    .await
    .map_err(Error::from)
  }
}

#[async_trait]
impl CompletionStore for SqliteStore {
  async fn record_completion(&self, completion: &SubResourceCompletion) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO sub_resource_completions (id, execution_id, resource_name, handler_id, created)
            VALUES (?, ?, ?, ?, ?)
            "#,
    )
    .bind(&completion.id)
    .bind(&completion.execution_id)
    .bind(&completion.resource_name)
    .bind(&completion.handler_id)
    .bind(completion.created)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn count_completions(&self, execution_id: &str) -> Result<u64, Error> {
    let count: i64 =
      sqlx::query_scalar("SELECT COUNT(*) FROM sub_resource_completions WHERE execution_id = ?")
        .bind(execution_id)
        .fetch_one(&self.pool)
        .await?;

    Ok(count.max(0) as u64)
  }

  async fn list_completions(&self, execution_id: &str) -> Result<Vec<SubResourceCompletion>, Error> {
    sqlx::query_as(
      r#"
            SELECT id, execution_id, resource_name, handler_id, created
            FROM sub_resource_completions
            WHERE execution_id = ?
            ORDER BY created ASC
            "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await
    .map_err(Error::from)
  }
}

#[async_trait]
impl LegacyUploadStore for SqliteStore {
  async fn create_upload(
    &self,
    state: &str,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<i64, Error> {
    let now = Utc::now();
    let result = sqlx::query(
      r#"
            INSERT INTO legacy_uploads (state, metadata, created, last_updated)
            VALUES (?, ?, ?, ?)
            "#,
    )
    .bind(state)
    .bind(Json(serde_json::Value::Object(metadata)))
    .bind(now)
    .bind(now)
    .execute(&self.pool)
    .await?;

    Ok(result.last_insert_rowid())
  }

  async fn update_uploads(
    &self,
    exec_id: &str,
    state: Option<&str>,
    metadata: serde_json::Map<String, serde_json::Value>,
  ) -> Result<u64, Error> {
    let result = sqlx::query(
      r#"
            UPDATE legacy_uploads
            SET state = COALESCE(?, state), metadata = ?, last_updated = ?
            WHERE json_extract(metadata, '$.exec_id') = ?
            "#,
    )
    .bind(state)
    .bind(Json(serde_json::Value::Object(metadata)))
    .bind(Utc::now())
    .bind(exec_id)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }

  async fn uploads_for(&self, exec_id: &str) -> Result<Vec<LegacyUpload>, Error> {
    sqlx::query_as(
      r#"
            SELECT id, state, metadata, created, last_updated
            FROM legacy_uploads
            WHERE json_extract(metadata, '$.exec_id') = ?
            ORDER BY id ASC
            "#,
    )
    .bind(exec_id)
    .fetch_all(&self.pool)
    .await
    .map_err(Error::from)
  }
}
