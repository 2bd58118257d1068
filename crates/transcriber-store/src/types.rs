use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transcriber_stage::{JobHandle, Payload};

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Succeeded,
  Failed,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, ExecutionStatus::Running)
  }
}

/// Why an execution failed.
///
/// The `Display` form starts with the variant name so input-validation,
/// external-job and timeout failures are distinguishable from the text alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
  /// A stage reported a permanent error.
  StageFailed { stage: String, message: String },
  /// A stage kept failing transiently past its retry budget.
  RetriesExhausted {
    stage: String,
    attempts: u32,
    message: String,
  },
  /// The external job itself reached a failed state.
  ExternalJobFailed { stage: String, detail: String },
  /// The polling loop ran out of attempts or wall-clock budget.
  PollingTimeout { stage: String, attempts: u32 },
  /// Too many statuses fell outside the classifier's known sets.
  UnrecognizedStatus {
    stage: String,
    status: String,
    attempts: u32,
  },
}

impl FailureReason {
  pub fn stage(&self) -> &str {
    match self {
      FailureReason::StageFailed { stage, .. }
      | FailureReason::RetriesExhausted { stage, .. }
      | FailureReason::ExternalJobFailed { stage, .. }
      | FailureReason::PollingTimeout { stage, .. }
      | FailureReason::UnrecognizedStatus { stage, .. } => stage,
    }
  }
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureReason::StageFailed { stage, message } => {
        write!(f, "StageFailed: stage '{}' failed: {}", stage, message)
      }
      FailureReason::RetriesExhausted {
        stage,
        attempts,
        message,
      } => write!(
        f,
        "RetriesExhausted: stage '{}' failed after {} attempts: {}",
        stage, attempts, message
      ),
      FailureReason::ExternalJobFailed { stage, detail } => {
        write!(f, "ExternalJobFailed: stage '{}': {}", stage, detail)
      }
      FailureReason::PollingTimeout { stage, attempts } => write!(
        f,
        "PollingTimeout: stage '{}' did not finish after {} status checks",
        stage, attempts
      ),
      FailureReason::UnrecognizedStatus {
        stage,
        status,
        attempts,
      } => write!(
        f,
        "UnrecognizedStatus: stage '{}' reported unrecognized status '{}' ({} checks)",
        stage, status, attempts
      ),
    }
  }
}

/// An external job submitted on behalf of a polling stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
  pub handle: JobHandle,
  pub submitted_at: DateTime<Utc>,
}

/// The fields one completed stage contributed, kept in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
  pub stage: String,
  pub index: usize,
  pub output: Payload,
  pub completed_at: DateTime<Utc>,
}

/// Attempted to mutate an execution that has already reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution '{execution_id}' is already {status:?}")]
pub struct TerminalExecution {
  pub execution_id: String,
  pub status: ExecutionStatus,
}

/// One run of a workflow for one triggering event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
  pub execution_id: String,
  pub workflow_id: String,
  /// Number of earlier terminated runs under the same id.
  pub generation: u32,
  /// Identity of the source artifact version that started this run.
  pub fingerprint: String,
  pub current_stage_index: usize,
  pub payload: Payload,
  pub status: ExecutionStatus,
  pub failure_reason: Option<FailureReason>,
  /// Status checks performed, keyed by polling stage name.
  pub attempt_counters: BTreeMap<String, u32>,
  /// Submitted external jobs, keyed by polling stage name.
  pub jobs: BTreeMap<String, JobRecord>,
  pub stage_outputs: Vec<StageOutput>,
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

impl Execution {
  /// A fresh execution positioned at the first stage.
  pub fn new(
    execution_id: impl Into<String>,
    workflow_id: impl Into<String>,
    fingerprint: impl Into<String>,
    payload: Payload,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      generation: 0,
      fingerprint: fingerprint.into(),
      current_stage_index: 0,
      payload,
      status: ExecutionStatus::Running,
      failure_reason: None,
      attempt_counters: BTreeMap::new(),
      jobs: BTreeMap::new(),
      stage_outputs: Vec::new(),
      started_at: now,
      finished_at: None,
      updated_at: now,
    }
  }

  pub fn with_generation(mut self, generation: u32) -> Self {
    self.generation = generation;
    self
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  pub fn attempts(&self, stage: &str) -> u32 {
    self.attempt_counters.get(stage).copied().unwrap_or(0)
  }

  fn ensure_running(&self) -> Result<(), TerminalExecution> {
    if self.is_terminal() {
      return Err(TerminalExecution {
        execution_id: self.execution_id.clone(),
        status: self.status,
      });
    }
    Ok(())
  }

  /// Record the submission of the external job for `stage`.
  pub fn record_job(
    &mut self,
    stage: &str,
    handle: JobHandle,
    now: DateTime<Utc>,
  ) -> Result<(), TerminalExecution> {
    self.ensure_running()?;
    self.jobs.insert(
      stage.to_string(),
      JobRecord {
        handle,
        submitted_at: now,
      },
    );
    self.updated_at = now;
    Ok(())
  }

  /// Count one status check for `stage` and return the new total.
  pub fn record_check(&mut self, stage: &str, now: DateTime<Utc>) -> Result<u32, TerminalExecution> {
    self.ensure_running()?;
    let counter = self.attempt_counters.entry(stage.to_string()).or_insert(0);
    *counter += 1;
    self.updated_at = now;
    Ok(*counter)
  }

  /// Merge the current stage's output and move to the next stage.
  ///
  /// Reaching the end of a workflow of `stage_count` stages marks the
  /// execution as succeeded.
  pub fn complete_stage(
    &mut self,
    stage: &str,
    output: Payload,
    stage_count: usize,
    now: DateTime<Utc>,
  ) -> Result<(), TerminalExecution> {
    self.ensure_running()?;
    self.stage_outputs.push(StageOutput {
      stage: stage.to_string(),
      index: self.current_stage_index,
      output: output.clone(),
      completed_at: now,
    });
    self.payload.merge(output);
    self.current_stage_index += 1;
    self.updated_at = now;

    if self.current_stage_index >= stage_count {
      self.status = ExecutionStatus::Succeeded;
      self.finished_at = Some(now);
    }
    Ok(())
  }

  /// Stop the execution with `reason`.
  pub fn fail(&mut self, reason: FailureReason, now: DateTime<Utc>) -> Result<(), TerminalExecution> {
    self.ensure_running()?;
    self.status = ExecutionStatus::Failed;
    self.failure_reason = Some(reason);
    self.finished_at = Some(now);
    self.updated_at = now;
    Ok(())
  }
}
