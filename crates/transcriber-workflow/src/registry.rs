//! Resolution of configuration into a [`WorkflowDefinition`].

use std::collections::HashMap;
use std::sync::Arc;

use transcriber_config::{StageConfig, StageKindDef, WorkflowDef};
use transcriber_stage::{PollingJob, Stage};

use crate::error::WorkflowError;
use crate::stage::{PollingSpec, StageKind, StageSpec};
use crate::workflow::WorkflowDefinition;

type InvokeFactory = Box<dyn Fn(&StageConfig) -> Result<Arc<dyn Stage>, String> + Send + Sync>;
type PollingFactory =
  Box<dyn Fn(&StageConfig) -> Result<Arc<dyn PollingJob>, String> + Send + Sync>;

enum Factory {
  Invoke(InvokeFactory),
  Polling(PollingFactory),
}

/// Maps component names used in workflow files to stage implementations.
///
/// Factories receive the stage's `config` block and build the implementation
/// once, at resolution time.
#[derive(Default)]
pub struct StageRegistry {
  factories: HashMap<String, Factory>,
}

impl StageRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_invoke<F>(&mut self, component: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn(&StageConfig) -> Result<Arc<dyn Stage>, String> + Send + Sync + 'static,
  {
    self
      .factories
      .insert(component.into(), Factory::Invoke(Box::new(factory)));
    self
  }

  pub fn register_polling<F>(&mut self, component: impl Into<String>, factory: F) -> &mut Self
  where
    F: Fn(&StageConfig) -> Result<Arc<dyn PollingJob>, String> + Send + Sync + 'static,
  {
    self
      .factories
      .insert(component.into(), Factory::Polling(Box::new(factory)));
    self
  }

  pub fn contains(&self, component: &str) -> bool {
    self.factories.contains_key(component)
  }

  /// Bind every stage of `def` to its implementation and validate the result.
  pub fn resolve(&self, def: WorkflowDef) -> Result<WorkflowDefinition, WorkflowError> {
    let mut builder = WorkflowDefinition::builder(def.workflow_id, def.name).settings(def.engine);

    for stage_def in def.stages {
      let component = stage_def.kind.component().to_string();
      let factory =
        self
          .factories
          .get(&component)
          .ok_or_else(|| WorkflowError::UnknownComponent {
            stage: stage_def.name.clone(),
            component: component.clone(),
          })?;

      let config_error = |message: String| WorkflowError::ComponentConfig {
        stage: stage_def.name.clone(),
        message,
      };

      let kind = match (&stage_def.kind, factory) {
        (StageKindDef::Invoke { .. }, Factory::Invoke(build)) => {
          StageKind::Invoke(build(&stage_def.config).map_err(config_error)?)
        }
        (StageKindDef::PollingJob { polling, .. }, Factory::Polling(build)) => {
          let job = build(&stage_def.config).map_err(config_error)?;
          StageKind::PollingJob(PollingSpec::from_def(job, polling))
        }
        (StageKindDef::Invoke { .. }, Factory::Polling(_)) => {
          return Err(WorkflowError::ComponentKindMismatch {
            stage: stage_def.name,
            component,
            expected: "invoke",
          });
        }
        (StageKindDef::PollingJob { .. }, Factory::Invoke(_)) => {
          return Err(WorkflowError::ComponentKindMismatch {
            stage: stage_def.name,
            component,
            expected: "polling_job",
          });
        }
      };

      builder = builder.stage(StageSpec {
        name: stage_def.name,
        kind,
        config: stage_def.config,
      });
    }

    builder.build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::time::Duration;
  use transcriber_stage::{JobHandle, JobStatusReport, Payload, StageContext, StageError};

  struct Tagged(String);

  #[async_trait]
  impl Stage for Tagged {
    async fn invoke(&self, _ctx: &StageContext, _payload: &Payload) -> Result<Payload, StageError> {
      Ok(Payload::new().with("tag", self.0.clone()))
    }
  }

  struct Job;

  #[async_trait]
  impl PollingJob for Job {
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
      Ok(JobStatusReport::new("COMPLETED"))
    }
  }

  fn registry() -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry
      .register_invoke("tagged", |config| {
        let tag = config
          .get("tag")
          .and_then(|v| v.as_str())
          .ok_or_else(|| "missing 'tag'".to_string())?;
        Ok(Arc::new(Tagged(tag.to_string())) as Arc<dyn Stage>)
      })
      .register_polling("job", |_| Ok(Arc::new(Job) as Arc<dyn PollingJob>));
    registry
  }

  fn parse(json: &str) -> WorkflowDef {
    WorkflowDef::from_json(json).unwrap()
  }

  #[test]
  fn test_resolve_workflow() {
    let def = parse(
      r#"{
        "workflow_id": "w", "name": "W",
        "stages": [
          { "name": "prep", "type": "invoke", "component": "tagged", "config": { "tag": "x" } },
          { "name": "run", "type": "polling_job", "component": "job",
            "polling": { "interval_ms": 250, "max_attempts": 3 } }
        ]
      }"#,
    );

    let workflow = registry().resolve(def).unwrap();
    assert_eq!(workflow.len(), 2);
    assert_eq!(workflow.stage(0).unwrap().config["tag"], "x");

    let StageKind::PollingJob(spec) = &workflow.stage(1).unwrap().kind else {
      panic!("expected polling stage");
    };
    assert_eq!(spec.interval, Duration::from_millis(250));
    assert_eq!(spec.max_attempts, Some(3));
  }

  #[test]
  fn test_unknown_component() {
    let def = parse(
      r#"{"workflow_id": "w", "name": "W",
          "stages": [{ "name": "a", "type": "invoke", "component": "missing" }]}"#,
    );
    let err = registry().resolve(def).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownComponent { component, .. } if component == "missing"));
  }

  #[test]
  fn test_kind_mismatch() {
    let def = parse(
      r#"{"workflow_id": "w", "name": "W",
          "stages": [{ "name": "a", "type": "polling_job", "component": "tagged" }]}"#,
    );
    let err = registry().resolve(def).unwrap_err();
    assert!(matches!(err, WorkflowError::ComponentKindMismatch { expected: "polling_job", .. }));
  }

  #[test]
  fn test_factory_config_error() {
    let def = parse(
      r#"{"workflow_id": "w", "name": "W",
          "stages": [{ "name": "a", "type": "invoke", "component": "tagged" }]}"#,
    );
    let err = registry().resolve(def).unwrap_err();
    assert_eq!(err.to_string(), "invalid config for stage 'a': missing 'tag'");
  }
}
