//! Stage interface for transcriber workflows.
//!
//! Every pipeline step satisfies one of two contracts:
//! - [`Stage`]: a single invocation that turns the running [`Payload`] into
//!   the fields it contributes, or fails with a [`StageError`].
//! - [`PollingJob`]: an external job that is submitted once and then checked
//!   until its raw status classifies as terminal (see [`ClassifyStatus`]).
//!
//! Stages must tolerate being re-invoked until the engine records them as
//! completed. Side effects that are not naturally idempotent have to be keyed
//! on the identifiers in [`StageContext`].

mod context;
mod error;
mod job;
mod payload;

pub use context::StageContext;
pub use error::StageError;
pub use job::{
  Classification, ClassifyStatus, JobHandle, JobOutcome, JobStatusReport, StatusClassifier,
};
pub use payload::Payload;

use async_trait::async_trait;

/// A synchronous transform step.
#[async_trait]
pub trait Stage: Send + Sync {
  /// Run the stage against the current payload.
  ///
  /// The returned payload holds the fields this stage produces. The engine
  /// merges it over the input, so fields a stage does not touch pass through.
  async fn invoke(&self, ctx: &StageContext, payload: &Payload) -> Result<Payload, StageError>;
}

/// A long-running external job driven by the engine's polling loop.
#[async_trait]
pub trait PollingJob: Send + Sync {
  /// Submit the job under the deterministic `job_id`.
  ///
  /// Submitting the same `job_id` twice must not start a second external job.
  async fn submit(
    &self,
    ctx: &StageContext,
    job_id: &str,
    payload: &Payload,
  ) -> Result<JobHandle, StageError>;

  /// Fetch the raw status of a previously submitted job.
  async fn check(
    &self,
    ctx: &StageContext,
    handle: &JobHandle,
  ) -> Result<JobStatusReport, StageError>;
}
