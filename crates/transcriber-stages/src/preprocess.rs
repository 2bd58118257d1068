//! Sanitizes an uploaded media file and moves it into the job-input bucket.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use deunicode::deunicode;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;
use transcriber_artifact::{Store as ArtifactStore, split_bucket};
use transcriber_config::StageConfig;
use transcriber_stage::{Payload, Stage, StageContext, StageError};

use crate::error::{BuildError, artifact_error, parse_config};

const FOLDER_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PreprocessConfig {
  /// Bucket the sanitized copy is written to.
  pub job_input_bucket: String,
  /// Offset applied to the event time in the `.uploaded-` suffix.
  #[serde(default)]
  pub utc_offset_minutes: i32,
  #[serde(default = "default_supported_formats")]
  pub supported_formats: Vec<String>,
  /// Job names longer than this are truncated and given a hash suffix.
  #[serde(default = "default_max_job_name_len")]
  pub max_job_name_len: usize,
  /// Prepended to `bucket/key` to form `mediaUri`, e.g. `s3://`.
  #[serde(default)]
  pub media_uri_prefix: String,
}

fn default_supported_formats() -> Vec<String> {
  ["mp3", "mp4", "wav", "flac", "ogg", "amr", "webm", "m4a"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_job_name_len() -> usize {
  180
}

/// The `preprocess` stage.
///
/// Input `{sourceLocation, eventTime}`, output `{jobName, mediaFormat,
/// mediaUri, outputKey}`.
pub struct Preprocess {
  artifacts: Arc<dyn ArtifactStore>,
  config: PreprocessConfig,
  offset: FixedOffset,
}

impl Preprocess {
  pub fn new(artifacts: Arc<dyn ArtifactStore>, config: PreprocessConfig) -> Result<Self, BuildError> {
    if config.job_input_bucket.is_empty() || config.job_input_bucket.contains('/') {
      return Err(BuildError::Invalid(format!(
        "job_input_bucket '{}' is not a bucket name",
        config.job_input_bucket
      )));
    }
    let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
      BuildError::Invalid(format!(
        "utc_offset_minutes {} is out of range",
        config.utc_offset_minutes
      ))
    })?;

    Ok(Self {
      artifacts,
      config,
      offset,
    })
  }

  pub fn from_config(artifacts: Arc<dyn ArtifactStore>, config: &StageConfig) -> Result<Self, BuildError> {
    Self::new(artifacts, parse_config(config)?)
  }
}

#[async_trait]
impl Stage for Preprocess {
  async fn invoke(&self, ctx: &StageContext, payload: &Payload) -> Result<Payload, StageError> {
    let source = payload.require_str("sourceLocation")?;
    let (_, uploaded_key) = split_bucket(source).ok_or_else(|| {
      StageError::permanent(format!("source location '{}' is not bucket/key", source))
    })?;
    let event_time = DateTime::parse_from_rfc3339(payload.require_str("eventTime")?)
      .map_err(|e| StageError::permanent(format!("invalid eventTime: {}", e)))?;

    let sanitized = sanitize_key(uploaded_key);
    let extension = extension(&sanitized);
    if !self.config.supported_formats.contains(&extension) {
      return Err(StageError::permanent(format!(
        "unsupported file format: {}, supported formats: {}",
        extension,
        self.config.supported_formats.join(", ")
      )));
    }

    let suffix = event_time
      .with_timezone(&self.offset)
      .format("%Y-%m-%d_%H-%M-%S");
    let new_key = format!("{}.uploaded-{}.{}", sanitized, suffix, extension);
    let destination = format!("{}/{}", self.config.job_input_bucket, new_key);

    // A retry after a partial run finds the copy already in place
    if !self.artifacts.exists(&destination).await.map_err(artifact_error)? {
      self
        .artifacts
        .copy(source, &destination)
        .await
        .map_err(artifact_error)?;
    }
    if self.artifacts.exists(source).await.map_err(artifact_error)? {
      self.artifacts.delete(source).await.map_err(artifact_error)?;
    }

    let job_name = job_name(&new_key, self.config.max_job_name_len);

    info!(
      execution_id = %ctx.execution_id,
      uploaded_key = %uploaded_key,
      sanitized_key = %sanitized,
      destination = %destination,
      job_name = %job_name,
      "upload_staged"
    );

    Ok(
      Payload::new()
        .with("jobName", job_name)
        .with("mediaFormat", extension)
        .with(
          "mediaUri",
          format!("{}{}", self.config.media_uri_prefix, destination),
        )
        .with("outputKey", format!("{}.transcription.json", new_key)),
    )
  }
}

/// Runs of characters not allowed in object keys.
static INVALID_CHARS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[^0-9a-zA-Z._-]+").expect("valid regex"));

/// Sanitize an object key segment by segment, keeping the folder structure.
///
/// Each segment is transliterated to ASCII first, then every run of
/// characters outside `[0-9a-zA-Z._-]` becomes exactly one `_`.
pub fn sanitize_key(key: &str) -> String {
  key
    .split('/')
    .filter(|segment| !segment.is_empty())
    .map(|segment| {
      INVALID_CHARS
        .replace_all(&deunicode(segment), "_")
        .into_owned()
    })
    .collect::<Vec<_>>()
    .join("/")
}

/// Lower-cased extension of the last path segment, without the dot.
fn extension(key: &str) -> String {
  let file_name = key.rsplit('/').next().unwrap_or(key);
  match file_name.rfind('.') {
    Some(0) | None => String::new(),
    Some(dot) => file_name[dot + 1..].to_lowercase(),
  }
}

/// External job name for a staged key.
///
/// Folder separators become `__`. Names longer than `max_len` are cut to
/// `max_len` characters and suffixed with `-` and the SHA-256 of the full name
/// taken modulo 10^8.
pub fn job_name(key: &str, max_len: usize) -> String {
  let name = key.replace('/', FOLDER_SEPARATOR);
  if name.chars().count() <= max_len {
    return name;
  }
  let truncated: String = name.chars().take(max_len).collect();
  format!("{}-{}", truncated, hash8(&name))
}

fn hash8(value: &str) -> u64 {
  const MODULUS: u64 = 100_000_000;
  Sha256::digest(value.as_bytes())
    .iter()
    .fold(0u64, |acc, byte| (acc * 256 + u64::from(*byte)) % MODULUS)
}
