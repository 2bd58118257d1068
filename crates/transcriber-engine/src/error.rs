//! Engine errors.
//!
//! Stage failures are not engine errors: they end up as a
//! [`FailureReason`](transcriber_store::FailureReason) on the execution.

use transcriber_store::TerminalExecution;

/// Infrastructure faults that stop the engine from driving an execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The execution store failed.
  #[error("store error: {0}")]
  Store(#[from] transcriber_store::Error),

  /// No active execution with this id.
  #[error("execution '{execution_id}' not found")]
  NotFound { execution_id: String },

  /// The stored execution was started by a different workflow.
  #[error("execution '{execution_id}' belongs to workflow '{actual}', not '{expected}'")]
  WorkflowMismatch {
    execution_id: String,
    expected: String,
    actual: String,
  },

  /// The stored stage index points past the workflow's stages.
  #[error("execution '{execution_id}' is at stage {index} but the workflow has {len} stages")]
  StageOutOfRange {
    execution_id: String,
    index: usize,
    len: usize,
  },

  /// A transition was attempted on a terminated execution.
  #[error(transparent)]
  Terminal(#[from] TerminalExecution),

  /// The start request could not be turned into an execution.
  #[error("invalid start request: {0}")]
  InvalidStart(#[from] transcriber_trigger::TriggerError),

  /// Execution was cancelled. The record stays running and can be resumed.
  #[error("execution cancelled")]
  Cancelled,

  /// The runner's trigger channel is closed.
  #[error("workflow runner channel closed")]
  ChannelClosed,

  /// A spawned execution task panicked or was aborted.
  #[error("execution task failed: {message}")]
  Join { message: String },
}

impl EngineError {
  pub(crate) fn from_store(execution_id: &str, err: transcriber_store::Error) -> Self {
    match err {
      transcriber_store::Error::NotFound(_) => EngineError::NotFound {
        execution_id: execution_id.to_string(),
      },
      other => EngineError::Store(other),
    }
  }
}
