//! Polling job backed by an HTTP transcription service.
//!
//! ```text
//! POST {base_url}/jobs              {jobName, mediaFormat, mediaUri, outputKey, languageOptions}
//! GET  {base_url}/jobs/{jobName}    → {status, detail?, resultLocation?}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use transcriber_config::StageConfig;
use transcriber_stage::{JobHandle, JobStatusReport, Payload, PollingJob, StageContext, StageError};

use crate::error::{BuildError, parse_config};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HttpJobConfig {
  pub base_url: String,
  #[serde(default)]
  pub language_options: Vec<String>,
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
  30_000
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
  job_name: &'a str,
  media_format: &'a str,
  media_uri: &'a str,
  output_key: &'a str,
  language_options: &'a [String],
}

/// The `http_job` polling stage.
///
/// The job name is the payload's `jobName` when present, otherwise the
/// engine's deterministic job id. A `409 Conflict` on submit means the job
/// already exists and is treated as success.
pub struct HttpJobClient {
  client: Client,
  base_url: String,
  language_options: Vec<String>,
}

impl HttpJobClient {
  pub fn new(config: HttpJobConfig) -> Result<Self, BuildError> {
    if config.base_url.is_empty() {
      return Err(BuildError::Invalid("base_url must not be empty".to_string()));
    }
    let client = Client::builder()
      .timeout(Duration::from_millis(config.timeout_ms))
      .build()?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      language_options: config.language_options,
    })
  }

  pub fn from_config(config: &StageConfig) -> Result<Self, BuildError> {
    Self::new(parse_config(config)?)
  }
}

#[async_trait]
impl PollingJob for HttpJobClient {
  async fn submit(
    &self,
    ctx: &StageContext,
    job_id: &str,
    payload: &Payload,
  ) -> Result<JobHandle, StageError> {
    let job_name = payload.get_str("jobName").unwrap_or(job_id);
    let body = SubmitRequest {
      job_name,
      media_format: payload.require_str("mediaFormat")?,
      media_uri: payload.require_str("mediaUri")?,
      output_key: payload.require_str("outputKey")?,
      language_options: &self.language_options,
    };

    let response = self
      .client
      .post(format!("{}/jobs", self.base_url))
      .json(&body)
      .send()
      .await
      .map_err(request_error)?;

    let status = response.status();
    debug!(
      execution_id = %ctx.execution_id,
      job_name = %job_name,
      status = status.as_u16(),
      "job_submit_response"
    );

    if status.is_success() || status == StatusCode::CONFLICT {
      return Ok(JobHandle::new(job_name));
    }
    Err(status_error(response).await)
  }

  async fn check(
    &self,
    _ctx: &StageContext,
    handle: &JobHandle,
  ) -> Result<JobStatusReport, StageError> {
    let response = self
      .client
      .get(format!("{}/jobs/{}", self.base_url, handle.job_name))
      .send()
      .await
      .map_err(request_error)?;

    if !response.status().is_success() {
      return Err(status_error(response).await);
    }

    response
      .json::<JobStatusReport>()
      .await
      .map_err(|e| StageError::permanent(format!("invalid job status response: {}", e)))
  }
}

/// Connection failures and timeouts are worth retrying.
fn request_error(err: reqwest::Error) -> StageError {
  if err.is_builder() {
    StageError::permanent(format!("invalid job service request: {}", err))
  } else {
    StageError::transient(format!("job service unreachable: {}", err))
  }
}

async fn status_error(response: Response) -> StageError {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  let message = format!("job service returned {}: {}", status.as_u16(), body);

  if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
    StageError::transient(message)
  } else {
    StageError::permanent(message)
  }
}
