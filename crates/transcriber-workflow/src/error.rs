use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow '{0}' has no stages")]
  NoStages(String),

  #[error("stage name must not be empty (position {0})")]
  EmptyStageName(usize),

  #[error("duplicate stage name: {0}")]
  DuplicateStage(String),

  #[error("only one polling stage is allowed per workflow: '{first}' and '{second}'")]
  MultiplePollingStages { first: String, second: String },

  #[error("stage '{stage}' references unknown component '{component}'")]
  UnknownComponent { stage: String, component: String },

  #[error("component '{component}' used by stage '{stage}' is not a {expected} component")]
  ComponentKindMismatch {
    stage: String,
    component: String,
    expected: &'static str,
  },

  #[error("invalid config for stage '{stage}': {message}")]
  ComponentConfig { stage: String, message: String },

  #[error("invalid polling settings for stage '{stage}': {message}")]
  InvalidPolling { stage: String, message: String },
}
