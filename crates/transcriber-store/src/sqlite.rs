use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};
use transcriber_stage::Payload;

use crate::{
  Error, Execution, ExecutionStatus, FailureReason, JobRecord, StageOutput, Store,
};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations")
      .run(&self.pool)
      .await
      .map_err(|e| Error::Database(e.into()))
  }
}

#[derive(FromRow)]
struct ExecutionRow {
  execution_id: String,
  workflow_id: String,
  generation: i64,
  fingerprint: String,
  current_stage_index: i64,
  payload: Json<Payload>,
  status: ExecutionStatus,
  failure_reason: Option<Json<FailureReason>>,
  attempt_counters: Json<BTreeMap<String, u32>>,
  jobs: Json<BTreeMap<String, JobRecord>>,
  stage_outputs: Json<Vec<StageOutput>>,
  started_at: DateTime<Utc>,
  finished_at: Option<DateTime<Utc>>,
  updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for Execution {
  type Error = Error;

  fn try_from(row: ExecutionRow) -> Result<Self, Error> {
    let decode = |e: std::num::TryFromIntError| Error::Database(sqlx::Error::Decode(Box::new(e)));

    Ok(Execution {
      execution_id: row.execution_id,
      workflow_id: row.workflow_id,
      generation: u32::try_from(row.generation).map_err(decode)?,
      fingerprint: row.fingerprint,
      current_stage_index: usize::try_from(row.current_stage_index).map_err(decode)?,
      payload: row.payload.0,
      status: row.status,
      failure_reason: row.failure_reason.map(|r| r.0),
      attempt_counters: row.attempt_counters.0,
      jobs: row.jobs.0,
      stage_outputs: row.stage_outputs.0,
      started_at: row.started_at,
      finished_at: row.finished_at,
      updated_at: row.updated_at,
    })
  }
}

fn collect(rows: Vec<ExecutionRow>) -> Result<Vec<Execution>, Error> {
  rows.into_iter().map(Execution::try_from).collect()
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            INSERT INTO executions (execution_id, workflow_id, generation, fingerprint, current_stage_index,
                                    payload, status, failure_reason, attempt_counters, jobs, stage_outputs,
                                    started_at, finished_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&execution.execution_id)
    .bind(&execution.workflow_id)
    .bind(i64::from(execution.generation))
    .bind(&execution.fingerprint)
    .bind(execution.current_stage_index as i64)
    .bind(Json(&execution.payload))
    .bind(execution.status)
    .bind(execution.failure_reason.as_ref().map(Json))
    .bind(Json(&execution.attempt_counters))
    .bind(Json(&execution.jobs))
    .bind(Json(&execution.stage_outputs))
    .bind(execution.started_at)
    .bind(execution.finished_at)
    .bind(execution.updated_at)
    .execute(&self.pool)
    .await;

    match result {
      Ok(_) => Ok(()),
      Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
        Err(Error::AlreadyExists(execution.execution_id.clone()))
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, Error> {
    let row: Option<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index, payload, status,
                   failure_reason, attempt_counters, jobs, stage_outputs, started_at, finished_at, updated_at
            FROM executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&self.pool)
    .await?;

    row.map(Execution::try_from).transpose()
  }

  async fn save_execution(&self, execution: &Execution) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE executions
            SET generation = ?, fingerprint = ?, current_stage_index = ?, payload = ?, status = ?,
                failure_reason = ?, attempt_counters = ?, jobs = ?, stage_outputs = ?,
                finished_at = ?, updated_at = ?
            WHERE execution_id = ?
            "#,
    )
    .bind(i64::from(execution.generation))
    .bind(&execution.fingerprint)
    .bind(execution.current_stage_index as i64)
    .bind(Json(&execution.payload))
    .bind(execution.status)
    .bind(execution.failure_reason.as_ref().map(Json))
    .bind(Json(&execution.attempt_counters))
    .bind(Json(&execution.jobs))
    .bind(Json(&execution.stage_outputs))
    .bind(execution.finished_at)
    .bind(execution.updated_at)
    .bind(&execution.execution_id)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::NotFound(execution.execution_id.clone()));
    }
    Ok(())
  }

  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, Error> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index, payload, status,
                   failure_reason, attempt_counters, jobs, stage_outputs, started_at, finished_at, updated_at
            FROM executions
            WHERE workflow_id = ?
            ORDER BY started_at DESC
            "#,
    )
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;

    collect(rows)
  }

  async fn list_running(&self, workflow_id: &str) -> Result<Vec<Execution>, Error> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index, payload, status,
                   failure_reason, attempt_counters, jobs, stage_outputs, started_at, finished_at, updated_at
            FROM executions
            WHERE workflow_id = ? AND status = ?
            ORDER BY started_at ASC
            "#,
    )
    .bind(workflow_id)
    .bind(ExecutionStatus::Running)
    .fetch_all(&self.pool)
    .await?;

    collect(rows)
  }

  async fn archive_execution(&self, execution_id: &str) -> Result<Execution, Error> {
    let mut tx = self.pool.begin().await?;

    let row: Option<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index, payload, status,
                   failure_reason, attempt_counters, jobs, stage_outputs, started_at, finished_at, updated_at
            FROM executions
            WHERE execution_id = ?
            "#,
    )
    .bind(execution_id)
    .fetch_optional(&mut *tx)
    .await?;

    let execution = row
      .map(Execution::try_from)
      .transpose()?
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))?;
    if !execution.is_terminal() {
      return Err(Error::StillRunning(execution_id.to_string()));
    }

    sqlx::query(
      r#"
            INSERT INTO execution_archive (execution_id, workflow_id, generation, fingerprint, current_stage_index,
                                           payload, status, failure_reason, attempt_counters, jobs, stage_outputs,
                                           started_at, finished_at, updated_at, archived_at)
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index,
                   payload, status, failure_reason, attempt_counters, jobs, stage_outputs,
                   started_at, finished_at, updated_at, ?
            FROM executions
            WHERE execution_id = ?
            "#,
    )
    .bind(Utc::now())
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM executions WHERE execution_id = ?")
      .bind(execution_id)
      .execute(&mut *tx)
      .await?;

    tx.commit().await?;
    Ok(execution)
  }

  async fn list_archived(&self, execution_id: &str) -> Result<Vec<Execution>, Error> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(
      r#"
            SELECT execution_id, workflow_id, generation, fingerprint, current_stage_index, payload, status,
                   failure_reason, attempt_counters, jobs, stage_outputs, started_at, finished_at, updated_at
            FROM execution_archive
            WHERE execution_id = ?
            ORDER BY generation ASC
            "#,
    )
    .bind(execution_id)
    .fetch_all(&self.pool)
    .await?;

    collect(rows)
  }
}
