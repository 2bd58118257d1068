use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use transcriber_stage::Payload;

/// Error type for trigger operations.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  #[error("invalid trigger event: {0}")]
  InvalidEvent(String),

  #[error("failed to parse trigger event: {0}")]
  Parse(#[from] serde_json::Error),
}

/// A new artifact landed in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactArrived {
  pub bucket: String,
  pub key: String,
  pub event_time: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub etag: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
}

/// Envelope of an "Object Created" storage notification.
#[derive(Deserialize)]
struct ObjectCreated {
  time: DateTime<Utc>,
  detail: ObjectCreatedDetail,
}

#[derive(Deserialize)]
struct ObjectCreatedDetail {
  bucket: NamedBucket,
  object: ObjectInfo,
}

#[derive(Deserialize)]
struct NamedBucket {
  name: String,
}

#[derive(Deserialize)]
struct ObjectInfo {
  key: String,
  #[serde(default)]
  etag: Option<String>,
  #[serde(default)]
  size: Option<u64>,
}

impl ArtifactArrived {
  pub fn new(bucket: impl Into<String>, key: impl Into<String>, event_time: DateTime<Utc>) -> Self {
    Self {
      bucket: bucket.into(),
      key: key.into(),
      event_time,
      etag: None,
      size: None,
    }
  }

  pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
    self.etag = Some(etag.into());
    self
  }

  pub fn with_size(mut self, size: u64) -> Self {
    self.size = Some(size);
    self
  }

  /// Parse either a plain `ArtifactArrived` document or an "Object Created"
  /// notification (`{time, detail: {bucket: {name}, object: {key, etag?, size?}}}`).
  pub fn from_json(json: &str) -> Result<Self, TriggerError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let event = if value.get("detail").is_some() {
      let created: ObjectCreated = serde_json::from_value(value)?;
      Self {
        bucket: created.detail.bucket.name,
        key: created.detail.object.key,
        event_time: created.time,
        etag: created.detail.object.etag,
        size: created.detail.object.size,
      }
    } else {
      serde_json::from_value(value)?
    };
    event.validate()?;
    Ok(event)
  }

  pub fn validate(&self) -> Result<(), TriggerError> {
    if self.bucket.is_empty() || self.bucket.contains('/') {
      return Err(TriggerError::InvalidEvent(format!(
        "invalid bucket name '{}'",
        self.bucket
      )));
    }
    if self.key.is_empty() || self.key.ends_with('/') {
      return Err(TriggerError::InvalidEvent(format!(
        "key '{}' does not name an object",
        self.key
      )));
    }
    Ok(())
  }

  /// `bucket/key` location of the artifact.
  pub fn source_location(&self) -> String {
    format!("{}/{}", self.bucket, self.key)
  }

  /// Stable id for the logical upload: hex SHA-256 of `bucket/key`.
  pub fn trigger_id(&self) -> String {
    hex::encode(Sha256::digest(self.source_location().as_bytes()))
  }

  /// Identity of this version of the artifact.
  pub fn fingerprint(&self) -> String {
    match (&self.etag, self.size) {
      (Some(etag), _) => etag.trim_matches('"').to_string(),
      (None, Some(size)) => format!("{}@{}", size, self.event_time.to_rfc3339()),
      (None, None) => self.event_time.to_rfc3339(),
    }
  }

  pub fn into_start_request(self) -> Result<StartRequest, TriggerError> {
    self.validate()?;
    let input = Payload::new()
      .with("sourceLocation", self.source_location())
      .with("eventTime", self.event_time.to_rfc3339());
    Ok(StartRequest {
      trigger_id: self.trigger_id(),
      fingerprint: self.fingerprint(),
      input,
    })
  }
}

/// Everything the engine needs to start (or absorb) one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
  pub trigger_id: String,
  pub fingerprint: String,
  pub input: Payload,
}

impl StartRequest {
  pub fn new(trigger_id: impl Into<String>, fingerprint: impl Into<String>, input: Payload) -> Self {
    Self {
      trigger_id: trigger_id.into(),
      fingerprint: fingerprint.into(),
      input,
    }
  }
}
