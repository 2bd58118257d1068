//! Retry budget and exponential backoff for transient stage failures.

use std::time::Duration;

use transcriber_config::RetryDef;

/// Exponential backoff policy derived from [`RetryDef`].
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
  max_retries: u32,
  initial: Duration,
  max: Duration,
  multiplier: f64,
}

impl Backoff {
  pub fn new(max_retries: u32, initial: Duration, max: Duration, multiplier: f64) -> Self {
    Self {
      max_retries,
      initial,
      max,
      multiplier: multiplier.max(1.0),
    }
  }

  pub fn from_def(def: &RetryDef) -> Self {
    Self::new(
      def.max_retries,
      Duration::from_millis(def.initial_backoff_ms),
      Duration::from_millis(def.max_backoff_ms),
      def.multiplier,
    )
  }

  /// Delay before retry number `retry` (1-based), or `None` once the budget
  /// is spent.
  pub fn delay(&self, retry: u32) -> Option<Duration> {
    if retry == 0 || retry > self.max_retries {
      return None;
    }
    let factor = self.multiplier.powi(retry as i32 - 1);
    let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
    Some(Duration::from_millis(millis as u64))
  }

  pub fn budget(&self) -> RetryBudget<'_> {
    RetryBudget {
      backoff: self,
      failures: 0,
    }
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::from_def(&RetryDef::default())
  }
}

/// Tracks consecutive transient failures of one operation.
#[derive(Debug)]
pub struct RetryBudget<'a> {
  backoff: &'a Backoff,
  failures: u32,
}

impl RetryBudget<'_> {
  /// Record a transient failure and return the delay before the next try,
  /// or `None` when the budget is exhausted.
  pub fn next_delay(&mut self) -> Option<Duration> {
    self.failures += 1;
    self.backoff.delay(self.failures)
  }

  /// Attempts made so far, including the one in flight.
  pub fn attempt(&self) -> u32 {
    self.failures + 1
  }

  /// Failed attempts so far.
  pub fn failures(&self) -> u32 {
    self.failures
  }
}
