#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use transcriber_config::EngineSettings;
use transcriber_engine::{ExecutionEngine, ExecutionNotifier};
use transcriber_stage::{
  JobHandle, JobStatusReport, Payload, PollingJob, Stage, StageContext, StageError,
};
use transcriber_store::{MemoryStore, Store};
use transcriber_trigger::StartRequest;
use transcriber_workflow::{PollingSpec, WorkflowDefinition};

/// Invoke stage that replays scripted results, then keeps returning `output`.
pub struct ScriptedStage {
  output: Payload,
  script: Mutex<VecDeque<Result<Payload, StageError>>>,
  calls: AtomicU32,
  contexts: Mutex<Vec<StageContext>>,
}

impl ScriptedStage {
  pub fn new(output: Payload) -> Arc<Self> {
    Self::with_script(output, vec![])
  }

  pub fn with_script(output: Payload, script: Vec<Result<Payload, StageError>>) -> Arc<Self> {
    Arc::new(Self {
      output,
      script: Mutex::new(script.into()),
      calls: AtomicU32::new(0),
      contexts: Mutex::new(Vec::new()),
    })
  }

  pub fn failing(error: StageError) -> Arc<Self> {
    Self::with_script(Payload::new(), vec![Err(error)])
  }

  pub fn calls(&self) -> u32 {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn contexts(&self) -> Vec<StageContext> {
    self.contexts.lock().unwrap().clone()
  }
}

#[async_trait]
impl Stage for ScriptedStage {
  async fn invoke(&self, ctx: &StageContext, _payload: &Payload) -> Result<Payload, StageError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.contexts.lock().unwrap().push(ctx.clone());
    let next = self.script.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Ok(self.output.clone()))
  }
}

/// External job that replays scripted status checks per job.
///
/// Every job sees the same script from the start; once it runs out the job
/// keeps reporting `fallback`.
pub struct ScriptedJob {
  script: Vec<Result<JobStatusReport, StageError>>,
  fallback: JobStatusReport,
  submit_errors: Mutex<VecDeque<StageError>>,
  submitted: Mutex<Vec<String>>,
  checks: Mutex<HashMap<String, usize>>,
  total_checks: AtomicU32,
  in_flight: AtomicU32,
  max_in_flight: AtomicU32,
}

impl ScriptedJob {
  pub fn new(script: Vec<Result<JobStatusReport, StageError>>, fallback: JobStatusReport) -> Arc<Self> {
    Arc::new(Self {
      script,
      fallback,
      submit_errors: Mutex::new(VecDeque::new()),
      submitted: Mutex::new(Vec::new()),
      checks: Mutex::new(HashMap::new()),
      total_checks: AtomicU32::new(0),
      in_flight: AtomicU32::new(0),
      max_in_flight: AtomicU32::new(0),
    })
  }

  /// A job reporting `statuses` in order, then staying on the last one.
  pub fn statuses(statuses: &[&str]) -> Arc<Self> {
    let script: Vec<_> = statuses
      .iter()
      .map(|s| Ok(JobStatusReport::new(*s)))
      .collect();
    let fallback = JobStatusReport::new(*statuses.last().unwrap_or(&"IN_PROGRESS"));
    Self::new(script, fallback)
  }

  pub fn failing_submits(self: Arc<Self>, errors: Vec<StageError>) -> Arc<Self> {
    *self.submit_errors.lock().unwrap() = errors.into();
    self
  }

  pub fn submitted(&self) -> Vec<String> {
    self.submitted.lock().unwrap().clone()
  }

  pub fn submits(&self) -> usize {
    self.submitted.lock().unwrap().len()
  }

  pub fn checks(&self) -> u32 {
    self.total_checks.load(Ordering::SeqCst)
  }

  pub fn max_in_flight(&self) -> u32 {
    self.max_in_flight.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl PollingJob for ScriptedJob {
  async fn submit(
    &self,
    _ctx: &StageContext,
    job_id: &str,
    _payload: &Payload,
  ) -> Result<JobHandle, StageError> {
    if let Some(err) = self.submit_errors.lock().unwrap().pop_front() {
      return Err(err);
    }
    self.submitted.lock().unwrap().push(job_id.to_string());
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    Ok(JobHandle::new(job_id))
  }

  async fn check(
    &self,
    _ctx: &StageContext,
    handle: &JobHandle,
  ) -> Result<JobStatusReport, StageError> {
    let index = {
      let mut checks = self.checks.lock().unwrap();
      let count = checks.entry(handle.job_name.clone()).or_insert(0);
      *count += 1;
      *count - 1
    };
    let result = self
      .script
      .get(index)
      .cloned()
      .unwrap_or_else(|| Ok(self.fallback.clone()));

    if let Ok(report) = &result {
      self.total_checks.fetch_add(1, Ordering::SeqCst);
      if report.status == "COMPLETED" || report.status == "FAILED" {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
      }
    }
    result
  }
}

pub fn input(location: &str) -> Payload {
  Payload::new().with("sourceLocation", location)
}

pub fn request(trigger_id: &str) -> StartRequest {
  StartRequest::new(trigger_id, "v1", input(&format!("uploads/{}.mp3", trigger_id)))
}

/// preprocess → transcribe (polling) → postprocess
pub struct Pipeline {
  pub preprocess: Arc<ScriptedStage>,
  pub job: Arc<ScriptedJob>,
  pub postprocess: Arc<ScriptedStage>,
}

impl Pipeline {
  pub fn new(job: Arc<ScriptedJob>) -> Self {
    Self::with_preprocess(
      ScriptedStage::new(
        Payload::new()
          .with("jobName", "lecture.mp3")
          .with("mediaFormat", "mp3"),
      ),
      job,
    )
  }

  pub fn with_preprocess(preprocess: Arc<ScriptedStage>, job: Arc<ScriptedJob>) -> Self {
    Self {
      preprocess,
      job,
      postprocess: ScriptedStage::new(
        Payload::new().with("destinationLocation", "subtitles/lecture.srt"),
      ),
    }
  }

  pub fn workflow(
    &self,
    polling: impl FnOnce(PollingSpec) -> PollingSpec,
    settings: EngineSettings,
  ) -> Arc<WorkflowDefinition> {
    let workflow = WorkflowDefinition::builder("transcribe", "Transcribe uploads")
      .invoke("preprocess", self.preprocess.clone())
      .polling("transcribe", polling(PollingSpec::new(self.job.clone())))
      .invoke("postprocess", self.postprocess.clone())
      .settings(settings)
      .build()
      .unwrap();
    Arc::new(workflow)
  }

  pub fn engine(&self, polling: impl FnOnce(PollingSpec) -> PollingSpec) -> Arc<ExecutionEngine> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Arc::new(ExecutionEngine::new(
      self.workflow(polling, EngineSettings::default()),
      store,
    ))
  }

  pub fn engine_with<N: ExecutionNotifier>(
    &self,
    polling: impl FnOnce(PollingSpec) -> PollingSpec,
    settings: EngineSettings,
    store: Arc<dyn Store>,
    notifier: N,
  ) -> Arc<ExecutionEngine<N>> {
    Arc::new(ExecutionEngine::with_notifier(
      self.workflow(polling, settings),
      store,
      notifier,
    ))
  }
}
