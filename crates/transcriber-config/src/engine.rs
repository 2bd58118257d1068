use serde::{Deserialize, Serialize};

/// Engine-wide settings shared by every execution of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
  /// Maximum number of executions allowed to hold a submitted or polling
  /// external job at the same time.
  #[serde(default = "default_max_active_jobs")]
  pub max_active_jobs: usize,

  /// Retry budget applied to transient stage failures.
  #[serde(default)]
  pub retry: RetryDef,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      max_active_jobs: default_max_active_jobs(),
      retry: RetryDef::default(),
    }
  }
}

fn default_max_active_jobs() -> usize {
  16
}

/// Exponential backoff policy for transient stage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryDef {
  /// Number of re-invocations after the first failed attempt (default: 3).
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Delay before the first retry (default: 1000).
  #[serde(default = "default_initial_backoff_ms")]
  pub initial_backoff_ms: u64,
  /// Upper bound on any single delay (default: 30000).
  #[serde(default = "default_max_backoff_ms")]
  pub max_backoff_ms: u64,
  /// Growth factor between consecutive delays (default: 2.0).
  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
}

impl Default for RetryDef {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      initial_backoff_ms: default_initial_backoff_ms(),
      max_backoff_ms: default_max_backoff_ms(),
      multiplier: default_multiplier(),
    }
  }
}

fn default_max_retries() -> u32 {
  3
}

fn default_initial_backoff_ms() -> u64 {
  1_000
}

fn default_max_backoff_ms() -> u64 {
  30_000
}

fn default_multiplier() -> f64 {
  2.0
}
