//! Built-in stages of the transcription pipeline.
//!
//! | Component     | Kind        | Stage                                   |
//! |---------------|-------------|-----------------------------------------|
//! | `preprocess`  | invoke      | [`Preprocess`]: sanitize and stage the upload |
//! | `http_job`    | polling_job | [`HttpJobClient`]: external transcription job |
//! | `postprocess` | invoke      | [`Postprocess`]: transcript JSON to SRT |
//! | `archive`     | invoke      | [`Archive`]: zip a bucket or prefix     |
//!
//! Use [`register_builtin`] to make them available to a
//! [`StageRegistry`](transcriber_workflow::StageRegistry).

mod archive;
mod error;
mod http_job;
mod postprocess;
mod preprocess;

pub use archive::{Archive, ArchiveConfig};
pub use error::BuildError;
pub use http_job::{HttpJobClient, HttpJobConfig};
pub use postprocess::{AudioSegment, Postprocess, PostprocessConfig, render_srt};
pub use preprocess::{Preprocess, PreprocessConfig, job_name, sanitize_key};

use std::sync::Arc;

use transcriber_artifact::Store as ArtifactStore;
use transcriber_stage::{PollingJob, Stage};
use transcriber_workflow::StageRegistry;

/// Register every built-in component against the given artifact store.
pub fn register_builtin(registry: &mut StageRegistry, artifacts: Arc<dyn ArtifactStore>) {
  let store = artifacts.clone();
  registry.register_invoke("preprocess", move |config| {
    let stage = Preprocess::from_config(store.clone(), config).map_err(|e| e.to_string())?;
    Ok(Arc::new(stage) as Arc<dyn Stage>)
  });

  registry.register_polling("http_job", |config| {
    let job = HttpJobClient::from_config(config).map_err(|e| e.to_string())?;
    Ok(Arc::new(job) as Arc<dyn PollingJob>)
  });

  let store = artifacts.clone();
  registry.register_invoke("postprocess", move |config| {
    let stage = Postprocess::from_config(store.clone(), config).map_err(|e| e.to_string())?;
    Ok(Arc::new(stage) as Arc<dyn Stage>)
  });

  let store = artifacts;
  registry.register_invoke("archive", move |config| {
    let stage = Archive::from_config(store.clone(), config).map_err(|e| e.to_string())?;
    Ok(Arc::new(stage) as Arc<dyn Stage>)
  });
}
