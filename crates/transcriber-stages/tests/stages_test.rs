use std::io::{Cursor, Read};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use transcriber_artifact::{FsStore, Store, read_all, write_all};
use transcriber_config::WorkflowDef;
use transcriber_stage::{Payload, Stage, StageContext};
use transcriber_stages::{
  Archive, ArchiveConfig, Postprocess, PostprocessConfig, Preprocess, PreprocessConfig,
  register_builtin,
};
use transcriber_workflow::StageRegistry;

fn artifacts() -> (TempDir, Arc<dyn Store>) {
  let dir = TempDir::new().unwrap();
  let store: Arc<dyn Store> = Arc::new(FsStore::new(dir.path()));
  (dir, store)
}

fn context(stage: &str) -> StageContext {
  StageContext {
    execution_id: "exec-1".to_string(),
    workflow_id: "transcribe".to_string(),
    generation: 1,
    stage: stage.to_string(),
    stage_index: 0,
    attempt: 1,
  }
}

fn preprocess_config() -> PreprocessConfig {
  PreprocessConfig {
    job_input_bucket: "media".to_string(),
    utc_offset_minutes: 0,
    supported_formats: vec!["mp3".to_string(), "wav".to_string()],
    max_job_name_len: 180,
    media_uri_prefix: "s3://".to_string(),
  }
}

#[tokio::test]
async fn test_preprocess_stages_sanitized_copy() {
  let (_dir, store) = artifacts();
  write_all(store.as_ref(), "uploads/Week 1/talk #1.MP3", "audio", "audio/mpeg")
    .await
    .unwrap();

  let stage = Preprocess::new(store.clone(), preprocess_config()).unwrap();
  let input = Payload::new()
    .with("sourceLocation", "uploads/Week 1/talk #1.MP3")
    .with("eventTime", "2025-03-01T10:15:30Z");
  let output = stage.invoke(&context("preprocess"), &input).await.unwrap();

  let staged = "Week_1/talk_1.MP3.uploaded-2025-03-01_10-15-30.mp3";
  assert_eq!(
    output.get_str("jobName"),
    Some("Week_1__talk_1.MP3.uploaded-2025-03-01_10-15-30.mp3")
  );
  assert_eq!(output.get_str("mediaFormat"), Some("mp3"));
  assert_eq!(
    output.get_str("mediaUri"),
    Some(format!("s3://media/{}", staged).as_str())
  );
  assert_eq!(
    output.get_str("outputKey"),
    Some(format!("{}.transcription.json", staged).as_str())
  );

  let copied = read_all(store.as_ref(), &format!("media/{}", staged)).await.unwrap();
  assert_eq!(&copied[..], b"audio");
  assert!(!store.exists("uploads/Week 1/talk #1.MP3").await.unwrap());
}

#[tokio::test]
async fn test_preprocess_applies_utc_offset() {
  let (_dir, store) = artifacts();
  write_all(store.as_ref(), "uploads/talk.wav", "audio", "audio/wav")
    .await
    .unwrap();

  let config = PreprocessConfig {
    utc_offset_minutes: 9 * 60,
    ..preprocess_config()
  };
  let stage = Preprocess::new(store.clone(), config).unwrap();
  let input = Payload::new()
    .with("sourceLocation", "uploads/talk.wav")
    .with("eventTime", "2025-03-01T20:00:00Z");
  let output = stage.invoke(&context("preprocess"), &input).await.unwrap();

  assert_eq!(
    output.get_str("jobName"),
    Some("talk.wav.uploaded-2025-03-02_05-00-00.wav")
  );
}

#[tokio::test]
async fn test_preprocess_retry_after_partial_run() {
  let (_dir, store) = artifacts();
  let staged = "media/talk.mp3.uploaded-2025-03-01_10-15-30.mp3";
  // The first attempt copied and deleted before failing to report
  write_all(store.as_ref(), staged, "audio", "audio/mpeg").await.unwrap();

  let stage = Preprocess::new(store.clone(), preprocess_config()).unwrap();
  let input = Payload::new()
    .with("sourceLocation", "uploads/talk.mp3")
    .with("eventTime", "2025-03-01T10:15:30Z");
  let output = stage.invoke(&context("preprocess"), &input).await.unwrap();

  assert_eq!(
    output.get_str("mediaUri"),
    Some(format!("s3://{}", staged).as_str())
  );
}

#[tokio::test]
async fn test_preprocess_rejects_unsupported_format() {
  let (_dir, store) = artifacts();
  write_all(store.as_ref(), "uploads/notes.txt", "text", "text/plain")
    .await
    .unwrap();

  let stage = Preprocess::new(store.clone(), preprocess_config()).unwrap();
  let input = Payload::new()
    .with("sourceLocation", "uploads/notes.txt")
    .with("eventTime", "2025-03-01T10:15:30Z");
  let err = stage.invoke(&context("preprocess"), &input).await.unwrap_err();

  assert!(!err.is_transient());
  assert_eq!(
    err.message(),
    "unsupported file format: txt, supported formats: mp3, wav"
  );
  assert!(store.exists("uploads/notes.txt").await.unwrap());
}

#[tokio::test]
async fn test_postprocess_writes_subtitles() {
  let (_dir, store) = artifacts();
  let transcript = json!({
    "jobName": "talk",
    "results": {
      "audio_segments": [
        {"id": 0, "start_time": "0.0", "end_time": "1.5", "transcript": "Good morning."},
        {"id": 1, "start_time": "1.5", "end_time": "3.25", "transcript": "Let's begin."}
      ]
    }
  });
  write_all(
    store.as_ref(),
    "transcripts/talk.mp3.transcription.json",
    transcript.to_string(),
    "application/json",
  )
  .await
  .unwrap();

  let stage = Postprocess::new(
    store.clone(),
    PostprocessConfig {
      destination_bucket: "subtitles".to_string(),
    },
  )
  .unwrap();
  let input = Payload::new().with("resultLocation", "transcripts/talk.mp3.transcription.json");
  let output = stage.invoke(&context("postprocess"), &input).await.unwrap();

  let destination = "subtitles/talk.mp3.transcription.srt";
  assert_eq!(output.get_str("destinationLocation"), Some(destination));

  let srt = read_all(store.as_ref(), destination).await.unwrap();
  assert_eq!(
    std::str::from_utf8(&srt).unwrap(),
    "1\n00:00:00,000 --> 00:00:01,500\nGood morning.\n\n\
     2\n00:00:01,500 --> 00:00:03,250\nLet's begin.\n\n"
  );
}

#[tokio::test]
async fn test_postprocess_missing_result_is_permanent() {
  let (_dir, store) = artifacts();
  let stage = Postprocess::new(
    store,
    PostprocessConfig {
      destination_bucket: "subtitles".to_string(),
    },
  )
  .unwrap();

  let input = Payload::new().with("resultLocation", "transcripts/missing.json");
  let err = stage.invoke(&context("postprocess"), &input).await.unwrap_err();

  assert!(!err.is_transient());
}

#[tokio::test]
async fn test_postprocess_malformed_transcript_is_permanent() {
  let (_dir, store) = artifacts();
  write_all(store.as_ref(), "transcripts/bad.json", "{\"results\": 1}", "application/json")
    .await
    .unwrap();

  let stage = Postprocess::new(
    store,
    PostprocessConfig {
      destination_bucket: "subtitles".to_string(),
    },
  )
  .unwrap();
  let input = Payload::new().with("resultLocation", "transcripts/bad.json");
  let err = stage.invoke(&context("postprocess"), &input).await.unwrap_err();

  assert!(!err.is_transient());
  assert!(err.message().starts_with("malformed transcript"));
}

#[tokio::test]
async fn test_archive_zips_prefix_without_nesting() {
  let (_dir, store) = artifacts();
  for (key, body) in [
    ("subtitles/a.srt", "one"),
    ("subtitles/week2/b.srt", "two"),
    ("subtitles/old.ZIP", "zip"),
    ("other/c.srt", "three"),
  ] {
    write_all(store.as_ref(), key, body, "text/plain").await.unwrap();
  }

  let stage = Archive::new(store.clone(), ArchiveConfig::default());
  let input = Payload::new().with("sourceBucketOrPrefix", "subtitles");
  let output = stage.invoke(&context("archive"), &input).await.unwrap();

  let location = output.get_str("archiveLocation").unwrap();
  assert!(location.starts_with("subtitles/all_"));
  assert!(location.ends_with("Z.zip"));
  assert_eq!(output.get("archivedFiles"), Some(&json!(2)));

  let bytes = read_all(store.as_ref(), location).await.unwrap();
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
  let mut names: Vec<String> = archive.file_names().map(String::from).collect();
  names.sort();
  assert_eq!(names, vec!["a.srt", "week2/b.srt"]);

  let mut content = String::new();
  archive
    .by_name("week2/b.srt")
    .unwrap()
    .read_to_string(&mut content)
    .unwrap();
  assert_eq!(content, "two");
}

#[tokio::test]
async fn test_archive_falls_back_to_configured_prefix() {
  let (_dir, store) = artifacts();
  write_all(store.as_ref(), "subtitles/a.srt", "one", "text/plain")
    .await
    .unwrap();

  let stage = Archive::new(
    store.clone(),
    ArchiveConfig {
      prefix: Some("subtitles/".to_string()),
    },
  );
  let output = stage
    .invoke(&context("archive"), &Payload::new())
    .await
    .unwrap();
  assert!(output.get_str("archiveLocation").unwrap().starts_with("subtitles/all_"));

  let unconfigured = Archive::new(store, ArchiveConfig::default());
  let err = unconfigured
    .invoke(&context("archive"), &Payload::new())
    .await
    .unwrap_err();
  assert!(!err.is_transient());
}

#[test]
fn test_register_builtin_resolves_pipeline() {
  let (_dir, store) = artifacts();
  let mut registry = StageRegistry::new();
  register_builtin(&mut registry, store);

  let def = WorkflowDef::from_json(
    r#"{
      "workflow_id": "transcribe",
      "name": "Transcribe uploads",
      "stages": [
        {"name": "preprocess", "type": "invoke", "component": "preprocess",
         "config": {"job_input_bucket": "media"}},
        {"name": "transcribe", "type": "polling_job", "component": "http_job",
         "polling": {"interval_ms": 10000, "max_attempts": 360},
         "config": {"base_url": "http://localhost:8080"}},
        {"name": "postprocess", "type": "invoke", "component": "postprocess",
         "config": {"destination_bucket": "subtitles"}}
      ]
    }"#,
  )
  .unwrap();

  let workflow = registry.resolve(def).unwrap();
  assert_eq!(workflow.len(), 3);
  assert_eq!(workflow.polling_stage(), Some(1));
}

#[test]
fn test_register_builtin_rejects_bad_config() {
  let (_dir, store) = artifacts();
  let mut registry = StageRegistry::new();
  register_builtin(&mut registry, store);

  let def = WorkflowDef::from_json(
    r#"{
      "workflow_id": "transcribe",
      "name": "Transcribe uploads",
      "stages": [
        {"name": "preprocess", "type": "invoke", "component": "preprocess",
         "config": {"job_input_bucket": "media/nested"}}
      ]
    }"#,
  )
  .unwrap();

  assert!(registry.resolve(def).is_err());
}
