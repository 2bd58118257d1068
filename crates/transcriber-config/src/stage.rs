use serde::{Deserialize, Serialize};

/// Free-form per-stage configuration handed to the stage implementation.
pub type StageConfig = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
  pub name: String,
  #[serde(flatten)]
  pub kind: StageKindDef,
  #[serde(default)]
  pub config: StageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageKindDef {
  /// Runs once and produces an output payload or fails.
  Invoke {
    /// Registry key of the stage implementation, e.g. "preprocess".
    component: String,
  },
  /// Submits an external job and polls it to a terminal state.
  PollingJob {
    component: String,
    #[serde(default)]
    polling: PollingDef,
  },
}

impl StageKindDef {
  pub fn component(&self) -> &str {
    match self {
      StageKindDef::Invoke { component } | StageKindDef::PollingJob { component, .. } => component,
    }
  }
}

/// How an unrecognized job status string is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecognizedStatus {
  /// Keep polling, bounded by `unrecognized_attempt_cap`.
  #[default]
  InProgress,
  /// Fail the stage on the first unrecognized status.
  Failed,
}

/// Polling loop settings for a `polling_job` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingDef {
  /// Wait between status checks (default: 10000).
  #[serde(default = "default_interval_ms")]
  pub interval_ms: u64,
  /// Maximum number of status checks before the stage times out.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_attempts: Option<u32>,
  /// Wall-clock budget measured from job submission.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deadline_ms: Option<u64>,
  #[serde(default = "default_completed_statuses")]
  pub completed_statuses: Vec<String>,
  #[serde(default = "default_failed_statuses")]
  pub failed_statuses: Vec<String>,
  #[serde(default = "default_in_progress_statuses")]
  pub in_progress_statuses: Vec<String>,
  #[serde(default)]
  pub unrecognized: UnrecognizedStatus,
  /// Total number of unrecognized statuses tolerated (default: 30).
  #[serde(default = "default_unrecognized_attempt_cap")]
  pub unrecognized_attempt_cap: u32,
}

impl Default for PollingDef {
  fn default() -> Self {
    Self {
      interval_ms: default_interval_ms(),
      max_attempts: None,
      deadline_ms: None,
      completed_statuses: default_completed_statuses(),
      failed_statuses: default_failed_statuses(),
      in_progress_statuses: default_in_progress_statuses(),
      unrecognized: UnrecognizedStatus::default(),
      unrecognized_attempt_cap: default_unrecognized_attempt_cap(),
    }
  }
}

fn default_interval_ms() -> u64 {
  10_000
}

fn default_completed_statuses() -> Vec<String> {
  vec!["COMPLETED".to_string()]
}

fn default_failed_statuses() -> Vec<String> {
  vec!["FAILED".to_string()]
}

fn default_in_progress_statuses() -> Vec<String> {
  vec!["QUEUED".to_string(), "IN_PROGRESS".to_string()]
}

fn default_unrecognized_attempt_cap() -> u32 {
  30
}
