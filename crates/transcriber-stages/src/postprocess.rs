//! Renders a finished transcript as SRT subtitles.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::info;
use transcriber_artifact::{Store as ArtifactStore, read_all, split_bucket, write_all};
use transcriber_config::StageConfig;
use transcriber_stage::{Payload, Stage, StageContext, StageError};

use crate::error::{BuildError, artifact_error, parse_config};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostprocessConfig {
  /// Bucket the `.srt` file is written to.
  pub destination_bucket: String,
}

#[derive(Debug, Deserialize)]
struct Transcript {
  results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
  audio_segments: Vec<AudioSegment>,
}

/// One timed chunk of the transcript. Times are seconds, given either as
/// numbers or as decimal strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioSegment {
  #[serde(deserialize_with = "seconds")]
  pub start_time: f64,
  #[serde(deserialize_with = "seconds")]
  pub end_time: f64,
  pub transcript: String,
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Seconds {
    Number(f64),
    Text(String),
  }

  match Seconds::deserialize(deserializer)? {
    Seconds::Number(value) => Ok(value),
    Seconds::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
  }
}

/// The `postprocess` stage.
///
/// Input `{resultLocation}`, output `{destinationLocation}`.
pub struct Postprocess {
  artifacts: Arc<dyn ArtifactStore>,
  config: PostprocessConfig,
}

impl Postprocess {
  pub fn new(artifacts: Arc<dyn ArtifactStore>, config: PostprocessConfig) -> Result<Self, BuildError> {
    if config.destination_bucket.is_empty() || config.destination_bucket.contains('/') {
      return Err(BuildError::Invalid(format!(
        "destination_bucket '{}' is not a bucket name",
        config.destination_bucket
      )));
    }
    Ok(Self { artifacts, config })
  }

  pub fn from_config(artifacts: Arc<dyn ArtifactStore>, config: &StageConfig) -> Result<Self, BuildError> {
    Self::new(artifacts, parse_config(config)?)
  }
}

#[async_trait]
impl Stage for Postprocess {
  async fn invoke(&self, ctx: &StageContext, payload: &Payload) -> Result<Payload, StageError> {
    let source = payload.require_str("resultLocation")?;
    let (_, source_key) = split_bucket(source).ok_or_else(|| {
      StageError::permanent(format!("result location '{}' is not bucket/key", source))
    })?;

    let raw = read_all(self.artifacts.as_ref(), source)
      .await
      .map_err(artifact_error)?;
    let transcript: Transcript = serde_json::from_slice(&raw)
      .map_err(|e| StageError::permanent(format!("malformed transcript '{}': {}", source, e)))?;

    let srt = render_srt(&transcript.results.audio_segments);
    let destination = format!(
      "{}/{}",
      self.config.destination_bucket,
      subtitle_key(source_key)
    );
    write_all(self.artifacts.as_ref(), &destination, srt, "text/srt")
      .await
      .map_err(artifact_error)?;

    info!(
      execution_id = %ctx.execution_id,
      source = %source,
      destination = %destination,
      segments = transcript.results.audio_segments.len(),
      "subtitles_written"
    );

    Ok(Payload::new().with("destinationLocation", destination))
  }
}

fn subtitle_key(key: &str) -> String {
  match key.strip_suffix(".json") {
    Some(stem) => format!("{}.srt", stem),
    None => format!("{}.srt", key),
  }
}

/// Render segments as SRT: 1-based index, `HH:MM:SS,mmm --> HH:MM:SS,mmm`,
/// text, blank line.
pub fn render_srt(segments: &[AudioSegment]) -> String {
  let mut out = String::new();
  for (index, segment) in segments.iter().enumerate() {
    // Writing to a String cannot fail
    let _ = writeln!(out, "{}", index + 1);
    let _ = writeln!(
      out,
      "{} --> {}",
      timestamp(segment.start_time),
      timestamp(segment.end_time)
    );
    let _ = writeln!(out, "{}", segment.transcript);
    out.push('\n');
  }
  out
}

fn timestamp(seconds: f64) -> String {
  let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
  let (hours, rest) = (total_ms / 3_600_000, total_ms % 3_600_000);
  let (minutes, rest) = (rest / 60_000, rest % 60_000);
  let (secs, millis) = (rest / 1000, rest % 1000);
  format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn segment(start: f64, end: f64, text: &str) -> AudioSegment {
    AudioSegment {
      start_time: start,
      end_time: end,
      transcript: text.to_string(),
    }
  }

  #[test]
  fn test_timestamp() {
    assert_eq!(timestamp(0.0), "00:00:00,000");
    assert_eq!(timestamp(1.234), "00:00:01,234");
    assert_eq!(timestamp(3725.5), "01:02:05,500");
    assert_eq!(timestamp(59.9996), "00:01:00,000");
  }

  #[test]
  fn test_render_srt() {
    let srt = render_srt(&[
      segment(0.0, 2.5, "Hello there."),
      segment(2.5, 4.25, "General Kenobi."),
    ]);

    assert_eq!(
      srt,
      "1\n00:00:00,000 --> 00:00:02,500\nHello there.\n\n\
       2\n00:00:02,500 --> 00:00:04,250\nGeneral Kenobi.\n\n"
    );
  }

  #[test]
  fn test_render_empty() {
    assert_eq!(render_srt(&[]), "");
  }

  #[test]
  fn test_segment_times_accept_strings() {
    let segment: AudioSegment = serde_json::from_str(
      r#"{"start_time": "1.5", "end_time": 2.0, "transcript": "hi", "id": 0}"#,
    )
    .unwrap();

    assert_eq!(segment, self::segment(1.5, 2.0, "hi"));
  }

  #[test]
  fn test_subtitle_key() {
    assert_eq!(subtitle_key("a/b.mp3.transcription.json"), "a/b.mp3.transcription.srt");
    assert_eq!(subtitle_key("a/b"), "a/b.srt");
  }
}
