use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::EngineSettings;
use crate::error::ConfigError;
use crate::stage::StageDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  pub stages: Vec<StageDef>,
  #[serde(default)]
  pub engine: EngineSettings,
}

impl WorkflowDef {
  /// Parse a workflow definition from a JSON string.
  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(content)?)
  }

  /// Read and parse a workflow definition file.
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }
}
