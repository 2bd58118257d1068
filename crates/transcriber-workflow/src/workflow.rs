use std::collections::HashSet;
use std::sync::Arc;

use transcriber_config::{EngineSettings, StageConfig};
use transcriber_stage::Stage;

use crate::error::WorkflowError;
use crate::stage::{PollingSpec, StageKind, StageSpec};

/// A resolved workflow ready for execution.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
  pub workflow_id: String,
  pub name: String,
  stages: Vec<StageSpec>,
  settings: EngineSettings,
}

impl WorkflowDefinition {
  pub fn builder(workflow_id: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
    WorkflowBuilder {
      workflow_id: workflow_id.into(),
      name: name.into(),
      stages: Vec::new(),
      settings: EngineSettings::default(),
    }
  }

  pub fn stages(&self) -> &[StageSpec] {
    &self.stages
  }

  pub fn stage(&self, index: usize) -> Option<&StageSpec> {
    self.stages.get(index)
  }

  pub fn len(&self) -> usize {
    self.stages.len()
  }

  /// Always false for a built definition; kept for API symmetry with `len`.
  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  /// Index of the polling stage, if the workflow has one.
  pub fn polling_stage(&self) -> Option<usize> {
    self.stages.iter().position(StageSpec::is_polling)
  }
}

/// Assembles a [`WorkflowDefinition`] stage by stage.
pub struct WorkflowBuilder {
  workflow_id: String,
  name: String,
  stages: Vec<StageSpec>,
  settings: EngineSettings,
}

impl WorkflowBuilder {
  pub fn invoke(self, name: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
    self.stage(StageSpec {
      name: name.into(),
      kind: StageKind::Invoke(stage),
      config: StageConfig::new(),
    })
  }

  pub fn polling(self, name: impl Into<String>, spec: PollingSpec) -> Self {
    self.stage(StageSpec {
      name: name.into(),
      kind: StageKind::PollingJob(spec),
      config: StageConfig::new(),
    })
  }

  pub fn stage(mut self, spec: StageSpec) -> Self {
    self.stages.push(spec);
    self
  }

  pub fn settings(mut self, settings: EngineSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
    validate(&self.workflow_id, &self.stages)?;

    Ok(WorkflowDefinition {
      workflow_id: self.workflow_id,
      name: self.name,
      stages: self.stages,
      settings: self.settings,
    })
  }
}

fn validate(workflow_id: &str, stages: &[StageSpec]) -> Result<(), WorkflowError> {
  if stages.is_empty() {
    return Err(WorkflowError::NoStages(workflow_id.to_string()));
  }

  let mut seen = HashSet::new();
  let mut polling: Option<&str> = None;

  for (index, stage) in stages.iter().enumerate() {
    if stage.name.trim().is_empty() {
      return Err(WorkflowError::EmptyStageName(index));
    }
    if !seen.insert(stage.name.as_str()) {
      return Err(WorkflowError::DuplicateStage(stage.name.clone()));
    }

    if let StageKind::PollingJob(spec) = &stage.kind {
      if let Some(first) = polling {
        return Err(WorkflowError::MultiplePollingStages {
          first: first.to_string(),
          second: stage.name.clone(),
        });
      }
      polling = Some(&stage.name);
      validate_polling(&stage.name, spec)?;
    }
  }

  Ok(())
}

fn validate_polling(stage: &str, spec: &PollingSpec) -> Result<(), WorkflowError> {
  if spec.max_attempts == Some(0) {
    return Err(WorkflowError::InvalidPolling {
      stage: stage.to_string(),
      message: "max_attempts must be at least 1".to_string(),
    });
  }
  if spec.unrecognized_attempt_cap == 0 {
    return Err(WorkflowError::InvalidPolling {
      stage: stage.to_string(),
      message: "unrecognized_attempt_cap must be at least 1".to_string(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use transcriber_stage::{JobHandle, JobStatusReport, Payload, PollingJob, StageContext, StageError};

  struct Passthrough;

  #[async_trait]
  impl Stage for Passthrough {
    async fn invoke(&self, _ctx: &StageContext, _payload: &Payload) -> Result<Payload, StageError> {
      Ok(Payload::new())
    }
  }

  struct NeverJob;

  #[async_trait]
  impl PollingJob for NeverJob {
    async fn submit(
      &self,
      _ctx: &StageContext,
      job_id: &str,
      _payload: &Payload,
    ) -> Result<JobHandle, StageError> {
      Ok(JobHandle::new(job_id))
    }

    async fn check(
      &self,
      _ctx: &StageContext,
      _handle: &JobHandle,
    ) -> Result<JobStatusReport, StageError> {
      Ok(JobStatusReport::new("IN_PROGRESS"))
    }
  }

  fn polling() -> PollingSpec {
    PollingSpec::new(Arc::new(NeverJob))
  }

  #[test]
  fn test_build_pipeline() {
    let workflow = WorkflowDefinition::builder("transcribe", "Transcribe")
      .invoke("preprocess", Arc::new(Passthrough))
      .polling("transcribe", polling())
      .invoke("postprocess", Arc::new(Passthrough))
      .build()
      .unwrap();

    assert_eq!(workflow.len(), 3);
    assert_eq!(workflow.polling_stage(), Some(1));
    assert_eq!(workflow.stage(2).unwrap().name, "postprocess");
    assert!(workflow.stage(3).is_none());
  }

  #[test]
  fn test_rejects_empty_workflow() {
    let result = WorkflowDefinition::builder("empty", "Empty").build();
    assert!(matches!(result, Err(WorkflowError::NoStages(id)) if id == "empty"));
  }

  #[test]
  fn test_rejects_duplicate_names() {
    let result = WorkflowDefinition::builder("w", "w")
      .invoke("a", Arc::new(Passthrough))
      .invoke("a", Arc::new(Passthrough))
      .build();
    assert!(matches!(result, Err(WorkflowError::DuplicateStage(name)) if name == "a"));
  }

  #[test]
  fn test_rejects_blank_name() {
    let result = WorkflowDefinition::builder("w", "w")
      .invoke(" ", Arc::new(Passthrough))
      .build();
    assert!(matches!(result, Err(WorkflowError::EmptyStageName(0))));
  }

  #[test]
  fn test_rejects_second_polling_stage() {
    let result = WorkflowDefinition::builder("w", "w")
      .polling("first", polling())
      .polling("second", polling())
      .build();
    assert!(matches!(
      result,
      Err(WorkflowError::MultiplePollingStages { first, second }) if first == "first" && second == "second"
    ));
  }

  #[test]
  fn test_rejects_zero_max_attempts() {
    let result = WorkflowDefinition::builder("w", "w")
      .polling("poll", polling().with_max_attempts(0))
      .build();
    assert!(matches!(result, Err(WorkflowError::InvalidPolling { .. })));
  }
}
