use serde::de::DeserializeOwned;
use transcriber_artifact::Error as ArtifactError;
use transcriber_config::StageConfig;
use transcriber_stage::StageError;

/// Error building a stage from its `config` block.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  #[error("invalid stage config: {0}")]
  Config(#[from] serde_json::Error),

  #[error("invalid stage config: {0}")]
  Invalid(String),

  #[error("failed to build http client: {0}")]
  Http(#[from] reqwest::Error),
}

pub(crate) fn parse_config<T: DeserializeOwned>(config: &StageConfig) -> Result<T, BuildError> {
  Ok(serde_json::from_value(serde_json::Value::Object(
    config.clone(),
  ))?)
}

/// Missing or malformed artifacts cannot be fixed by retrying; I/O can.
pub(crate) fn artifact_error(err: ArtifactError) -> StageError {
  match err {
    ArtifactError::NotFound(key) => StageError::permanent(format!("artifact not found: {}", key)),
    ArtifactError::InvalidKey(key) => StageError::permanent(format!("invalid artifact key: {}", key)),
    ArtifactError::Io(e) => StageError::transient(format!("artifact io error: {}", e)),
  }
}
