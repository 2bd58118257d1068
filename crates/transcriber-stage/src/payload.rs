use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;

/// The record threaded from one stage to the next.
///
/// Always a JSON object. Stages read the fields they need and return only the
/// fields they produce; [`Payload::merge`] layers those over the running record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
  pub fn new() -> Self {
    Self(Map::new())
  }

  /// Build a payload from a JSON value, rejecting anything but an object.
  pub fn from_value(value: Value) -> Result<Self, StageError> {
    match value {
      Value::Object(map) => Ok(Self(map)),
      other => Err(StageError::permanent(format!(
        "payload must be a JSON object, got {}",
        other
      ))),
    }
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// Read a required string field.
  ///
  /// A missing or non-string field is a permanent input error.
  pub fn require_str(&self, key: &str) -> Result<&str, StageError> {
    match self.0.get(key) {
      Some(Value::String(s)) => Ok(s),
      Some(other) => Err(StageError::permanent(format!(
        "field '{}' must be a string, got {}",
        key, other
      ))),
      None => Err(StageError::permanent(format!("missing required field '{}'", key))),
    }
  }

  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.0.get(key).and_then(Value::as_str)
  }

  /// Layer `other` over this payload. Fields in `other` win.
  pub fn merge(&mut self, other: Payload) {
    self.0.extend(other.0);
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }
}

impl From<Map<String, Value>> for Payload {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}
