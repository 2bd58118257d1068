//! Transient-failure retries around a single stage operation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;
use transcriber_stage::StageError;
use transcriber_store::FailureReason;

use crate::backoff::Backoff;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};

/// Sleep for `duration`, waking early with [`EngineError::Cancelled`].
///
/// This is a scheduled timer, so a parked execution holds no worker thread.
pub(crate) async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), EngineError> {
  tokio::select! {
    _ = tokio::time::sleep(duration) => Ok(()),
    _ = cancel.cancelled() => Err(EngineError::Cancelled),
  }
}

/// Runs one stage operation, retrying transient errors within the backoff
/// budget.
pub(crate) struct Retrier<'a> {
  pub backoff: &'a Backoff,
  pub cancel: &'a CancellationToken,
  pub notifier: &'a dyn ExecutionNotifier,
  pub execution_id: &'a str,
  pub stage: &'a str,
}

impl Retrier<'_> {
  /// Call `op` with the 1-based attempt number until it succeeds, fails
  /// permanently, or exhausts the retry budget.
  ///
  /// The inner `Err` is the failure to record on the execution; the outer one
  /// is an engine fault (only cancellation here).
  pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<Result<T, FailureReason>, EngineError>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
  {
    let mut budget = self.backoff.budget();

    loop {
      let attempt = budget.attempt();
      let result = tokio::select! {
        result = op(attempt) => result,
        _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
      };

      let err = match result {
        Ok(value) => return Ok(Ok(value)),
        Err(err) => err,
      };

      if !err.is_transient() {
        return Ok(Err(FailureReason::StageFailed {
          stage: self.stage.to_string(),
          message: err.message().to_string(),
        }));
      }

      let Some(delay) = budget.next_delay() else {
        return Ok(Err(FailureReason::RetriesExhausted {
          stage: self.stage.to_string(),
          attempts: budget.failures(),
          message: err.message().to_string(),
        }));
      };

      warn!(
        execution_id = %self.execution_id,
        stage = %self.stage,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "stage_retrying"
      );
      self.notifier.notify(ExecutionEvent::StageRetrying {
        execution_id: self.execution_id.to_string(),
        stage: self.stage.to_string(),
        attempt,
        delay_ms: delay.as_millis() as u64,
        error: err.message().to_string(),
      });

      sleep(delay, self.cancel).await?;
    }
  }
}
