//! Transcriber Store
//!
//! This crate provides the storage trait and implementations for execution
//! records. Every field an execution needs to be resumed after a restart is
//! persisted (see [`Execution`]).
//!
//! The [`Store`] trait defines operations for:
//! - Atomically creating an execution (the start-once guarantee for an id)
//! - Saving an execution after each transition
//! - Querying running and historical executions
//! - Archiving terminated executions

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
  Execution, ExecutionStatus, FailureReason, JobRecord, StageOutput, TerminalExecution,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// An active record with this id already exists.
  #[error("execution already exists: {0}")]
  AlreadyExists(String),

  /// Only terminal executions can be archived.
  #[error("execution is still running: {0}")]
  StillRunning(String),

  /// A stored JSON column could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for execution records.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert a new execution.
  ///
  /// Fails with [`Error::AlreadyExists`] if an active record with the same id
  /// exists. This is the only operation that may create a record.
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error>;

  /// Look up an active execution by id.
  async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, Error>;

  /// Overwrite an existing execution with its latest state.
  async fn save_execution(&self, execution: &Execution) -> Result<(), Error>;

  /// List active executions for a workflow, newest first.
  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, Error>;

  /// List executions of a workflow that have not reached a terminal state.
  async fn list_running(&self, workflow_id: &str) -> Result<Vec<Execution>, Error>;

  /// Move a terminated execution out of the active set.
  ///
  /// The id becomes free for a new generation.
  async fn archive_execution(&self, execution_id: &str) -> Result<Execution, Error>;

  /// Archived generations of an execution id, oldest first.
  async fn list_archived(&self, execution_id: &str) -> Result<Vec<Execution>, Error>;

  /// Look up an active execution, failing if it does not exist.
  async fn get_execution(&self, execution_id: &str) -> Result<Execution, Error> {
    self
      .find_execution(execution_id)
      .await?
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))
  }
}
