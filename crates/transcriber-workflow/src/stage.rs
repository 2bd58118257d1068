use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use transcriber_config::{PollingDef, StageConfig, UnrecognizedStatus};
use transcriber_stage::{ClassifyStatus, JobOutcome, PollingJob, Stage, StatusClassifier};

/// One step of a resolved workflow.
#[derive(Clone)]
pub struct StageSpec {
  pub name: String,
  pub kind: StageKind,
  pub config: StageConfig,
}

impl StageSpec {
  pub fn is_polling(&self) -> bool {
    matches!(self.kind, StageKind::PollingJob(_))
  }
}

impl fmt::Debug for StageSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StageSpec")
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("config", &self.config)
      .finish()
  }
}

#[derive(Clone)]
pub enum StageKind {
  Invoke(Arc<dyn Stage>),
  PollingJob(PollingSpec),
}

impl fmt::Debug for StageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StageKind::Invoke(_) => f.write_str("Invoke"),
      StageKind::PollingJob(spec) => f.debug_tuple("PollingJob").field(spec).finish(),
    }
  }
}

/// Submit-then-poll settings of a polling stage.
#[derive(Clone)]
pub struct PollingSpec {
  pub job: Arc<dyn PollingJob>,
  pub classifier: Arc<dyn ClassifyStatus>,
  pub interval: Duration,
  pub max_attempts: Option<u32>,
  pub deadline: Option<Duration>,
  pub unrecognized_attempt_cap: u32,
}

impl PollingSpec {
  /// Polling spec with the default classifier and a 10 second interval.
  pub fn new(job: Arc<dyn PollingJob>) -> Self {
    Self::from_def(job, &PollingDef::default())
  }

  pub fn from_def(job: Arc<dyn PollingJob>, def: &PollingDef) -> Self {
    let unrecognized = match def.unrecognized {
      UnrecognizedStatus::InProgress => JobOutcome::InProgress,
      UnrecognizedStatus::Failed => JobOutcome::Failed,
    };
    let classifier = StatusClassifier::new(
      def.completed_statuses.clone(),
      def.failed_statuses.clone(),
      def.in_progress_statuses.clone(),
    )
    .with_unrecognized(unrecognized);

    Self {
      job,
      classifier: Arc::new(classifier),
      interval: Duration::from_millis(def.interval_ms),
      max_attempts: def.max_attempts,
      deadline: def.deadline_ms.map(Duration::from_millis),
      unrecognized_attempt_cap: def.unrecognized_attempt_cap,
    }
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = Some(max_attempts);
    self
  }

  pub fn with_deadline(mut self, deadline: Duration) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn with_classifier(mut self, classifier: Arc<dyn ClassifyStatus>) -> Self {
    self.classifier = classifier;
    self
  }

  pub fn with_unrecognized_attempt_cap(mut self, cap: u32) -> Self {
    self.unrecognized_attempt_cap = cap;
    self
  }
}

impl fmt::Debug for PollingSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PollingSpec")
      .field("interval", &self.interval)
      .field("max_attempts", &self.max_attempts)
      .field("deadline", &self.deadline)
      .field("unrecognized_attempt_cap", &self.unrecognized_attempt_cap)
      .finish_non_exhaustive()
  }
}
