//! Zips every artifact under a bucket or prefix into one archive.

use std::io::{Cursor, Write};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use transcriber_artifact::{Store as ArtifactStore, read_all, write_all};
use transcriber_config::StageConfig;
use transcriber_stage::{Payload, Stage, StageContext, StageError};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::{BuildError, artifact_error, parse_config};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArchiveConfig {
  /// Used when the payload has no `sourceBucketOrPrefix`.
  #[serde(default)]
  pub prefix: Option<String>,
}

/// The `archive` stage.
///
/// Input `{sourceBucketOrPrefix}`, output `{archiveLocation}`. Existing `.zip`
/// files are left out so archives do not nest.
pub struct Archive {
  artifacts: Arc<dyn ArtifactStore>,
  config: ArchiveConfig,
}

impl Archive {
  pub fn new(artifacts: Arc<dyn ArtifactStore>, config: ArchiveConfig) -> Self {
    Self { artifacts, config }
  }

  pub fn from_config(artifacts: Arc<dyn ArtifactStore>, config: &StageConfig) -> Result<Self, BuildError> {
    Ok(Self::new(artifacts, parse_config(config)?))
  }
}

#[async_trait]
impl Stage for Archive {
  async fn invoke(&self, ctx: &StageContext, payload: &Payload) -> Result<Payload, StageError> {
    let source = payload
      .get_str("sourceBucketOrPrefix")
      .or(self.config.prefix.as_deref())
      .ok_or_else(|| StageError::permanent("missing required field 'sourceBucketOrPrefix'"))?;
    let prefix = normalize_prefix(source)?;

    let keys: Vec<String> = self
      .artifacts
      .list(&prefix)
      .await
      .map_err(artifact_error)?
      .into_iter()
      .filter(|key| !key.to_lowercase().ends_with(".zip"))
      .collect();

    let mut entries = Vec::with_capacity(keys.len());
    for key in &keys {
      let data = read_all(self.artifacts.as_ref(), key)
        .await
        .map_err(artifact_error)?;
      entries.push((key[prefix.len()..].to_string(), data));
    }

    let archive = tokio::task::spawn_blocking(move || build_zip(entries))
      .await
      .map_err(|e| StageError::transient(format!("archive task failed: {}", e)))??;

    let destination = format!(
      "{}all_{}Z.zip",
      prefix,
      Utc::now().format("%Y-%m-%d_%H-%M-%S")
    );
    write_all(self.artifacts.as_ref(), &destination, archive, "application/zip")
      .await
      .map_err(artifact_error)?;

    info!(
      execution_id = %ctx.execution_id,
      prefix = %prefix,
      files = keys.len(),
      destination = %destination,
      "archive_written"
    );

    Ok(
      Payload::new()
        .with("archiveLocation", destination)
        .with("archivedFiles", keys.len()),
    )
  }
}

/// `bucket` or `bucket/sub/dir` as a listing prefix ending in `/`.
fn normalize_prefix(source: &str) -> Result<String, StageError> {
  let trimmed = source.trim_matches('/');
  if trimmed.is_empty() {
    return Err(StageError::permanent("archive source must name a bucket"));
  }
  Ok(format!("{}/", trimmed))
}

fn build_zip(entries: Vec<(String, Bytes)>) -> Result<Vec<u8>, StageError> {
  let zip_error = |e: zip::result::ZipError| StageError::permanent(format!("zip error: {}", e));
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

  let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
  for (name, data) in entries {
    writer.start_file(name, options).map_err(zip_error)?;
    writer
      .write_all(&data)
      .map_err(|e| StageError::permanent(format!("zip error: {}", e)))?;
  }
  Ok(writer.finish().map_err(zip_error)?.into_inner())
}
