use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Reference to a submitted external job, as returned by the submit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
  pub job_name: String,
}

impl JobHandle {
  pub fn new(job_name: impl Into<String>) -> Self {
    Self {
      job_name: job_name.into(),
    }
  }
}

/// Raw result of a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
  pub status: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_location: Option<String>,
}

impl JobStatusReport {
  pub fn new(status: impl Into<String>) -> Self {
    Self {
      status: status.into(),
      detail: None,
      result_location: None,
    }
  }

  pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
    self.detail = Some(detail.into());
    self
  }

  pub fn with_result_location(mut self, location: impl Into<String>) -> Self {
    self.result_location = Some(location.into());
    self
  }

  /// Fields contributed to the running payload when the job completes.
  pub fn to_payload(&self) -> Payload {
    let mut payload = Payload::new().with("jobStatus", self.status.clone());
    if let Some(detail) = &self.detail {
      payload.insert("jobDetail", detail.clone());
    }
    if let Some(location) = &self.result_location {
      payload.insert("resultLocation", location.clone());
    }
    payload
  }
}

/// Closed classification of an external job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
  InProgress,
  Completed,
  Failed,
}

/// Result of classifying one raw status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
  pub outcome: JobOutcome,
  /// False when the status matched none of the known strings and the
  /// outcome came from the unrecognized-status policy.
  pub recognized: bool,
}

/// Maps a raw status string to exactly one [`JobOutcome`].
pub trait ClassifyStatus: Send + Sync {
  fn classify(&self, status: &str) -> Classification;
}

/// Classifier backed by exact string sets.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
  completed: HashSet<String>,
  failed: HashSet<String>,
  in_progress: HashSet<String>,
  unrecognized: JobOutcome,
}

impl StatusClassifier {
  pub fn new<I, S>(completed: I, failed: I, in_progress: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      completed: completed.into_iter().map(Into::into).collect(),
      failed: failed.into_iter().map(Into::into).collect(),
      in_progress: in_progress.into_iter().map(Into::into).collect(),
      unrecognized: JobOutcome::InProgress,
    }
  }

  /// Outcome assigned to statuses outside every known set.
  pub fn with_unrecognized(mut self, outcome: JobOutcome) -> Self {
    self.unrecognized = outcome;
    self
  }
}

impl Default for StatusClassifier {
  fn default() -> Self {
    Self::new(vec!["COMPLETED"], vec!["FAILED"], vec!["QUEUED", "IN_PROGRESS"])
  }
}

impl ClassifyStatus for StatusClassifier {
  fn classify(&self, status: &str) -> Classification {
    let known = if self.completed.contains(status) {
      Some(JobOutcome::Completed)
    } else if self.failed.contains(status) {
      Some(JobOutcome::Failed)
    } else if self.in_progress.contains(status) {
      Some(JobOutcome::InProgress)
    } else {
      None
    };

    match known {
      Some(outcome) => Classification {
        outcome,
        recognized: true,
      },
      None => Classification {
        outcome: self.unrecognized,
        recognized: false,
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_known_statuses() {
    let classifier = StatusClassifier::default();

    assert_eq!(classifier.classify("COMPLETED").outcome, JobOutcome::Completed);
    assert_eq!(classifier.classify("FAILED").outcome, JobOutcome::Failed);
    assert_eq!(classifier.classify("QUEUED").outcome, JobOutcome::InProgress);
    assert!(classifier.classify("IN_PROGRESS").recognized);
  }

  #[test]
  fn test_unrecognized_defaults_to_in_progress() {
    let classifier = StatusClassifier::default();

    let result = classifier.classify("PAUSED");
    assert_eq!(result.outcome, JobOutcome::InProgress);
    assert!(!result.recognized);

    // Exact match only.
    assert!(!classifier.classify("completed").recognized);
  }

  #[test]
  fn test_unrecognized_policy_override() {
    let classifier = StatusClassifier::default().with_unrecognized(JobOutcome::Failed);

    assert_eq!(classifier.classify("PAUSED").outcome, JobOutcome::Failed);
    assert_eq!(classifier.classify("COMPLETED").outcome, JobOutcome::Completed);
  }

  #[test]
  fn test_report_to_payload() {
    let report = JobStatusReport::new("COMPLETED").with_result_location("out/a.json");
    let payload = report.to_payload();

    assert_eq!(payload.get_str("jobStatus"), Some("COMPLETED"));
    assert_eq!(payload.get_str("resultLocation"), Some("out/a.json"));
    assert!(payload.get("jobDetail").is_none());
  }

  #[test]
  fn test_report_wire_format() {
    let report: JobStatusReport = serde_json::from_str(
      r#"{"status": "FAILED", "detail": "Unsupported media encoding"}"#,
    )
    .unwrap();

    assert_eq!(report.detail.as_deref(), Some("Unsupported media encoding"));
    assert_eq!(report.result_location, None);
  }
}
