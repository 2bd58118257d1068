//! The submit-then-poll state machine of a polling stage.
//!
//! ```text
//! NotSubmitted ──submit──▶ Submitted ──▶ Waiting ──▶ Checking ─┬─▶ Completed
//!                                           ▲                  ├─▶ Failed
//!                                           └──── InProgress ──┘
//! ```
//!
//! The job is submitted at most once per execution generation: the returned
//! handle is persisted before the first wait, so a resumed execution goes
//! straight back to waiting. Every status check is counted and persisted.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use transcriber_stage::{JobHandle, JobOutcome, JobStatusReport, StageContext};
use transcriber_store::{Execution, FailureReason, Store};
use transcriber_workflow::PollingSpec;

use crate::backoff::Backoff;
use crate::engine::StageOutcome;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::retry::{Retrier, sleep};

/// Deterministic external job id for a polling stage of an execution.
///
/// The generation is part of the id so a restarted execution for a changed
/// artifact submits a new job instead of colliding with the old one.
pub fn job_id(execution: &Execution, stage: &str) -> String {
  format!(
    "{}-{}-{}",
    execution.execution_id, stage, execution.generation
  )
}

/// Drives one polling stage of one execution to a terminal outcome.
pub(crate) struct JobPoller<'a> {
  pub(crate) stage: &'a str,
  pub(crate) index: usize,
  pub(crate) spec: &'a PollingSpec,
  pub(crate) store: &'a dyn Store,
  pub(crate) notifier: &'a dyn ExecutionNotifier,
  pub(crate) backoff: &'a Backoff,
  pub(crate) cancel: &'a CancellationToken,
}

impl JobPoller<'_> {
  pub(crate) async fn run(&self, execution: &mut Execution) -> Result<StageOutcome, EngineError> {
    let handle = match execution.jobs.get(self.stage) {
      Some(record) => {
        debug!(
          execution_id = %execution.execution_id,
          stage = %self.stage,
          job_name = %record.handle.job_name,
          attempts = execution.attempts(self.stage),
          "job_resumed"
        );
        record.handle.clone()
      }
      None => match self.submit(execution).await? {
        Ok(handle) => handle,
        Err(reason) => return Ok(StageOutcome::Failed(reason)),
      },
    };

    let deadline = self.deadline(execution);

    loop {
      if let Some(reason) = self.attempts_exhausted(execution) {
        return Ok(StageOutcome::Failed(reason));
      }

      sleep(self.next_wait(deadline), self.cancel).await?;

      let report = match self.check(execution, &handle).await? {
        Ok(report) => report,
        Err(reason) => return Ok(StageOutcome::Failed(reason)),
      };

      let attempts = execution.record_check(self.stage, Utc::now())?;
      let classification = self.spec.classifier.classify(&report.status);

      info!(
        execution_id = %execution.execution_id,
        stage = %self.stage,
        attempt = attempts,
        status = %report.status,
        outcome = ?classification.outcome,
        recognized = classification.recognized,
        "job_polled"
      );
      self.notifier.notify(ExecutionEvent::JobPolled {
        execution_id: execution.execution_id.clone(),
        stage: self.stage.to_string(),
        attempt: attempts,
        status: report.status.clone(),
        outcome: classification.outcome,
      });

      match classification.outcome {
        JobOutcome::Completed => return Ok(StageOutcome::Completed(report.to_payload())),
        JobOutcome::Failed if !classification.recognized => {
          return Ok(StageOutcome::Failed(self.unrecognized(&report, attempts)));
        }
        JobOutcome::Failed => {
          return Ok(StageOutcome::Failed(FailureReason::ExternalJobFailed {
            stage: self.stage.to_string(),
            detail: external_detail(&report),
          }));
        }
        JobOutcome::InProgress => {}
      }

      if !classification.recognized && attempts >= self.spec.unrecognized_attempt_cap {
        return Ok(StageOutcome::Failed(self.unrecognized(&report, attempts)));
      }
      if self.spec.max_attempts.is_some_and(|max| attempts >= max)
        || deadline.is_some_and(|at| Instant::now() >= at)
      {
        return Ok(StageOutcome::Failed(self.timeout(attempts)));
      }

      // Only in-progress checks are persisted here; terminal outcomes are
      // saved by the engine together with the stage transition.
      self.store.save_execution(execution).await?;
    }
  }

  async fn submit(
    &self,
    execution: &mut Execution,
  ) -> Result<Result<JobHandle, FailureReason>, EngineError> {
    let job_id = job_id(execution, self.stage);
    let payload = execution.payload.clone();
    let base = self.context(execution);

    let result = self
      .retrier(&execution.execution_id)
      .run(|attempt| {
        let ctx = StageContext {
          attempt,
          ..base.clone()
        };
        let job = &self.spec.job;
        let job_id = &job_id;
        let payload = &payload;
        async move { job.submit(&ctx, job_id, payload).await }
      })
      .await?;

    let handle = match result {
      Ok(handle) => handle,
      Err(reason) => return Ok(Err(reason)),
    };

    execution.record_job(self.stage, handle.clone(), Utc::now())?;
    self.store.save_execution(execution).await?;

    info!(
      execution_id = %execution.execution_id,
      stage = %self.stage,
      job_id = %job_id,
      job_name = %handle.job_name,
      "job_submitted"
    );
    self.notifier.notify(ExecutionEvent::JobSubmitted {
      execution_id: execution.execution_id.clone(),
      stage: self.stage.to_string(),
      job_name: handle.job_name.clone(),
    });

    Ok(Ok(handle))
  }

  async fn check(
    &self,
    execution: &Execution,
    handle: &JobHandle,
  ) -> Result<Result<JobStatusReport, FailureReason>, EngineError> {
    let base = self.context(execution);
    self
      .retrier(&execution.execution_id)
      .run(|attempt| {
        let ctx = StageContext {
          attempt,
          ..base.clone()
        };
        let job = &self.spec.job;
        async move { job.check(&ctx, handle).await }
      })
      .await
  }

  fn retrier<'r>(&'r self, execution_id: &'r str) -> Retrier<'r> {
    Retrier {
      backoff: self.backoff,
      cancel: self.cancel,
      notifier: self.notifier,
      execution_id,
      stage: self.stage,
    }
  }

  fn context(&self, execution: &Execution) -> StageContext {
    StageContext {
      execution_id: execution.execution_id.clone(),
      workflow_id: execution.workflow_id.clone(),
      generation: execution.generation,
      stage: self.stage.to_string(),
      stage_index: self.index,
      attempt: 1,
    }
  }

  /// Wall-clock deadline measured from the persisted submission time, so a
  /// resumed execution does not get a fresh budget.
  fn deadline(&self, execution: &Execution) -> Option<Instant> {
    let deadline = self.spec.deadline?;
    let elapsed = execution
      .jobs
      .get(self.stage)
      .and_then(|record| (Utc::now() - record.submitted_at).to_std().ok())
      .unwrap_or(Duration::ZERO);
    Some(Instant::now() + deadline.saturating_sub(elapsed))
  }

  fn next_wait(&self, deadline: Option<Instant>) -> Duration {
    match deadline {
      Some(at) => self
        .spec
        .interval
        .min(at.saturating_duration_since(Instant::now())),
      None => self.spec.interval,
    }
  }

  fn attempts_exhausted(&self, execution: &Execution) -> Option<FailureReason> {
    let attempts = execution.attempts(self.stage);
    self
      .spec
      .max_attempts
      .filter(|max| attempts >= *max)
      .map(|_| self.timeout(attempts))
  }

  fn timeout(&self, attempts: u32) -> FailureReason {
    FailureReason::PollingTimeout {
      stage: self.stage.to_string(),
      attempts,
    }
  }

  fn unrecognized(&self, report: &JobStatusReport, attempts: u32) -> FailureReason {
    FailureReason::UnrecognizedStatus {
      stage: self.stage.to_string(),
      status: report.status.clone(),
      attempts,
    }
  }
}

fn external_detail(report: &JobStatusReport) -> String {
  match &report.detail {
    Some(detail) => detail.clone(),
    None => format!("job finished with status {}", report.status),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_job_id_is_deterministic() {
    let now = Utc::now();
    let execution = Execution::new("abc", "wf", "fp", Default::default(), now);

    assert_eq!(job_id(&execution, "transcribe"), "abc-transcribe-0");
    assert_eq!(
      job_id(&execution.clone().with_generation(2), "transcribe"),
      "abc-transcribe-2"
    );
  }

  #[test]
  fn test_external_detail() {
    let report = JobStatusReport::new("FAILED").with_detail("Unsupported media encoding");
    assert_eq!(external_detail(&report), "Unsupported media encoding");

    let report = JobStatusReport::new("ERROR");
    assert_eq!(external_detail(&report), "job finished with status ERROR");
  }
}
