//! Execution engine.
//!
//! The `ExecutionEngine` owns one immutable [`WorkflowDefinition`] and drives
//! its executions stage by stage. Each transition is persisted before it is
//! announced, so an execution can be resumed from its stored record at any
//! point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use transcriber_stage::{Payload, Stage, StageContext};
use transcriber_store::{Execution, ExecutionStatus, FailureReason, Store};
use transcriber_trigger::{ArtifactArrived, StartRequest};
use transcriber_workflow::{PollingSpec, StageKind, StageSpec, WorkflowDefinition};

use crate::backoff::Backoff;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::poller::JobPoller;
use crate::retry::Retrier;

/// What a stage run produced.
pub(crate) enum StageOutcome {
  /// Fields to merge into the running payload.
  Completed(Payload),
  Failed(FailureReason),
}

/// Result of [`ExecutionEngine::start`].
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
  /// A new execution was created.
  Started(Execution),
  /// The trigger was absorbed by an existing execution.
  Duplicate(Execution),
}

impl StartOutcome {
  pub fn execution(&self) -> &Execution {
    match self {
      StartOutcome::Started(execution) | StartOutcome::Duplicate(execution) => execution,
    }
  }

  pub fn into_execution(self) -> Execution {
    match self {
      StartOutcome::Started(execution) | StartOutcome::Duplicate(execution) => execution,
    }
  }

  pub fn is_duplicate(&self) -> bool {
    matches!(self, StartOutcome::Duplicate(_))
  }
}

/// One async mutex per execution id, dropped once nobody holds or waits on it.
#[derive(Default)]
struct ExecutionLocks {
  inner: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl ExecutionLocks {
  async fn lock(&self, execution_id: &str) -> OwnedMutexGuard<()> {
    let mutex = {
      let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
      locks.retain(|_, lock| lock.strong_count() > 0);
      match locks.get(execution_id).and_then(Weak::upgrade) {
        Some(mutex) => mutex,
        None => {
          let mutex = Arc::new(AsyncMutex::new(()));
          locks.insert(execution_id.to_string(), Arc::downgrade(&mutex));
          mutex
        }
      }
    };
    mutex.lock_owned().await
  }
}

/// The workflow execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `ExecutionEngine::new()` for an engine with no-op
/// notifications, or `ExecutionEngine::with_notifier()` to observe events.
///
/// Executions share nothing but the workflow definition, the store and the
/// active-job cap. Every stage run of one execution happens under its own
/// lock, so at most one task advances it at a time. Start requests use a
/// separate per-id lock and only read a running execution.
pub struct ExecutionEngine<N: ExecutionNotifier = NoopNotifier> {
  workflow: Arc<WorkflowDefinition>,
  store: Arc<dyn Store>,
  notifier: N,
  backoff: Backoff,
  max_active_jobs: usize,
  job_slots: Semaphore,
  /// Held while a stage of the execution runs.
  locks: ExecutionLocks,
  /// Held while a start request for the id is decided.
  start_locks: ExecutionLocks,
}

impl ExecutionEngine<NoopNotifier> {
  pub fn new(workflow: Arc<WorkflowDefinition>, store: Arc<dyn Store>) -> Self {
    Self::with_notifier(workflow, store, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> ExecutionEngine<N> {
  pub fn with_notifier(workflow: Arc<WorkflowDefinition>, store: Arc<dyn Store>, notifier: N) -> Self {
    let settings = workflow.settings();
    let backoff = Backoff::from_def(&settings.retry);
    let max_active_jobs = settings.max_active_jobs.max(1);

    Self {
      workflow,
      store,
      notifier,
      backoff,
      max_active_jobs,
      job_slots: Semaphore::new(max_active_jobs),
      locks: ExecutionLocks::default(),
      start_locks: ExecutionLocks::default(),
    }
  }

  pub fn workflow(&self) -> &WorkflowDefinition {
    &self.workflow
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Number of executions currently holding a submitted or polling job.
  pub fn active_jobs(&self) -> usize {
    self.max_active_jobs - self.job_slots.available_permits()
  }

  /// Start an execution for an artifact arrival.
  pub async fn start_trigger(&self, event: ArtifactArrived) -> Result<StartOutcome, EngineError> {
    self.start(event.into_start_request()?).await
  }

  /// Create an execution for `request`, or absorb it.
  ///
  /// A request is absorbed when an execution with the same trigger id is
  /// still running, or has terminated for the same input fingerprint. A
  /// terminated execution with a different fingerprint is archived and a new
  /// generation starts at stage 0.
  #[instrument(
    name = "execution_start",
    skip(self, request),
    fields(
      workflow_id = %self.workflow.workflow_id,
      execution_id = %request.trigger_id,
    )
  )]
  pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, EngineError> {
    // Starts never wait on `locks`: a running execution may hold it for a
    // whole polling stage.
    let _start = self.start_locks.lock(&request.trigger_id).await;

    let mut generation = 0;
    let mut _advance = None;
    if let Some(existing) = self.store.find_execution(&request.trigger_id).await? {
      self.check_workflow(&existing)?;
      if !existing.is_terminal() || existing.fingerprint == request.fingerprint {
        return Ok(self.absorb(existing));
      }

      // Terminal records are only held briefly by a run that is winding down
      _advance = Some(self.locks.lock(&existing.execution_id).await);
      let archived = self.store.archive_execution(&existing.execution_id).await?;
      info!(
        execution_id = %archived.execution_id,
        generation = archived.generation,
        status = ?archived.status,
        "execution_archived"
      );
      generation = archived.generation + 1;
    }

    let execution = Execution::new(
      request.trigger_id,
      self.workflow.workflow_id.clone(),
      request.fingerprint,
      request.input,
      Utc::now(),
    )
    .with_generation(generation);

    match self.store.create_execution(&execution).await {
      Ok(()) => {}
      Err(transcriber_store::Error::AlreadyExists(_)) => {
        // Another process won the race for this id
        let existing = self.load(&execution.execution_id).await?;
        return Ok(self.absorb(existing));
      }
      Err(e) => return Err(e.into()),
    }

    info!(
      execution_id = %execution.execution_id,
      workflow_id = %execution.workflow_id,
      generation = execution.generation,
      input = ?execution.payload,
      "execution_started"
    );
    self.notifier.notify(ExecutionEvent::ExecutionStarted {
      execution_id: execution.execution_id.clone(),
      workflow_id: execution.workflow_id.clone(),
      generation: execution.generation,
    });

    Ok(StartOutcome::Started(execution))
  }

  /// Run the current stage of an execution to completion or failure and
  /// persist the transition.
  ///
  /// Terminal executions are returned unchanged.
  #[instrument(
    name = "execution_advance",
    skip(self, cancel),
    fields(workflow_id = %self.workflow.workflow_id)
  )]
  pub async fn advance(
    &self,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Execution, EngineError> {
    let _guard = self.locks.lock(execution_id).await;

    let mut execution = self.load(execution_id).await?;
    if execution.is_terminal() {
      return Ok(execution);
    }

    let index = execution.current_stage_index;
    let stage = self
      .workflow
      .stage(index)
      .ok_or_else(|| EngineError::StageOutOfRange {
        execution_id: execution_id.to_string(),
        index,
        len: self.workflow.len(),
      })?;

    info!(
      execution_id = %execution_id,
      stage = %stage.name,
      index,
      "stage_started"
    );
    self.notifier.notify(ExecutionEvent::StageStarted {
      execution_id: execution_id.to_string(),
      stage: stage.name.clone(),
      index,
    });

    let outcome = match &stage.kind {
      StageKind::Invoke(handler) => {
        self
          .invoke_stage(&execution, stage, handler.as_ref(), cancel)
          .await?
      }
      StageKind::PollingJob(spec) => self.poll_stage(&mut execution, stage, spec, cancel).await?,
    };

    self.record_outcome(&mut execution, stage, outcome).await?;
    Ok(execution)
  }

  /// Advance an execution until it reaches a terminal state.
  #[instrument(
    name = "execution_run",
    skip(self, cancel),
    fields(workflow_id = %self.workflow.workflow_id)
  )]
  pub async fn run(
    &self,
    execution_id: &str,
    cancel: &CancellationToken,
  ) -> Result<Execution, EngineError> {
    loop {
      if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }
      let execution = self.advance(execution_id, cancel).await?;
      if execution.is_terminal() {
        return Ok(execution);
      }
    }
  }

  /// Get an execution of this workflow.
  pub async fn get(&self, execution_id: &str) -> Result<Execution, EngineError> {
    self.load(execution_id).await
  }

  /// List active executions of this workflow, newest first.
  pub async fn list(&self) -> Result<Vec<Execution>, EngineError> {
    Ok(self.store.list_executions(&self.workflow.workflow_id).await?)
  }

  async fn invoke_stage(
    &self,
    execution: &Execution,
    stage: &StageSpec,
    handler: &dyn Stage,
    cancel: &CancellationToken,
  ) -> Result<StageOutcome, EngineError> {
    let base = stage_context(execution, stage);
    let payload = &execution.payload;

    let result = self
      .retrier(&execution.execution_id, &stage.name, cancel)
      .run(|attempt| {
        let ctx = StageContext {
          attempt,
          ..base.clone()
        };
        async move { handler.invoke(&ctx, payload).await }
      })
      .await?;

    Ok(match result {
      Ok(output) => StageOutcome::Completed(output),
      Err(reason) => StageOutcome::Failed(reason),
    })
  }

  async fn poll_stage(
    &self,
    execution: &mut Execution,
    stage: &StageSpec,
    spec: &PollingSpec,
    cancel: &CancellationToken,
  ) -> Result<StageOutcome, EngineError> {
    let _permit = tokio::select! {
      permit = self.job_slots.acquire() => permit.map_err(|_| EngineError::Cancelled)?,
      _ = cancel.cancelled() => return Err(EngineError::Cancelled),
    };
    debug!(
      execution_id = %execution.execution_id,
      active_jobs = self.active_jobs(),
      max_active_jobs = self.max_active_jobs,
      "job_slot_acquired"
    );

    let poller = JobPoller {
      stage: &stage.name,
      index: execution.current_stage_index,
      spec,
      store: self.store.as_ref(),
      notifier: &self.notifier,
      backoff: &self.backoff,
      cancel,
    };
    poller.run(execution).await
  }

  async fn record_outcome(
    &self,
    execution: &mut Execution,
    stage: &StageSpec,
    outcome: StageOutcome,
  ) -> Result<(), EngineError> {
    let now = Utc::now();

    match outcome {
      StageOutcome::Completed(output) => {
        let index = execution.current_stage_index;
        execution.complete_stage(&stage.name, output.clone(), self.workflow.len(), now)?;
        self.store.save_execution(execution).await?;

        info!(
          execution_id = %execution.execution_id,
          stage = %stage.name,
          index,
          output = ?output,
          "stage_completed"
        );
        self.notifier.notify(ExecutionEvent::StageCompleted {
          execution_id: execution.execution_id.clone(),
          stage: stage.name.clone(),
          index,
          output: output.into_value(),
        });

        if execution.status == ExecutionStatus::Succeeded {
          info!(
            execution_id = %execution.execution_id,
            stages = self.workflow.len(),
            "execution_succeeded"
          );
          self.notifier.notify(ExecutionEvent::ExecutionSucceeded {
            execution_id: execution.execution_id.clone(),
          });
        }
      }
      StageOutcome::Failed(reason) => {
        execution.fail(reason.clone(), now)?;
        self.store.save_execution(execution).await?;

        error!(
          execution_id = %execution.execution_id,
          stage = %stage.name,
          reason = %reason,
          "execution_failed"
        );
        self.notifier.notify(ExecutionEvent::ExecutionFailed {
          execution_id: execution.execution_id.clone(),
          reason,
        });
      }
    }

    Ok(())
  }

  fn retrier<'a>(
    &'a self,
    execution_id: &'a str,
    stage: &'a str,
    cancel: &'a CancellationToken,
  ) -> Retrier<'a> {
    Retrier {
      backoff: &self.backoff,
      cancel,
      notifier: &self.notifier,
      execution_id,
      stage,
    }
  }

  fn absorb(&self, existing: Execution) -> StartOutcome {
    info!(
      execution_id = %existing.execution_id,
      status = ?existing.status,
      "duplicate_trigger"
    );
    self.notifier.notify(ExecutionEvent::DuplicateTrigger {
      execution_id: existing.execution_id.clone(),
      status: existing.status,
    });
    StartOutcome::Duplicate(existing)
  }

  async fn load(&self, execution_id: &str) -> Result<Execution, EngineError> {
    let execution = self
      .store
      .get_execution(execution_id)
      .await
      .map_err(|e| EngineError::from_store(execution_id, e))?;
    self.check_workflow(&execution)?;
    Ok(execution)
  }

  fn check_workflow(&self, execution: &Execution) -> Result<(), EngineError> {
    if execution.workflow_id != self.workflow.workflow_id {
      return Err(EngineError::WorkflowMismatch {
        execution_id: execution.execution_id.clone(),
        expected: self.workflow.workflow_id.clone(),
        actual: execution.workflow_id.clone(),
      });
    }
    Ok(())
  }
}

impl<N: ExecutionNotifier + 'static> ExecutionEngine<N> {
  /// Drive an execution to a terminal state on a background task.
  pub fn spawn(
    self: &Arc<Self>,
    execution_id: impl Into<String>,
    cancel: CancellationToken,
  ) -> JoinHandle<Result<Execution, EngineError>> {
    let engine = Arc::clone(self);
    let execution_id = execution_id.into();
    tokio::spawn(async move { engine.run(&execution_id, &cancel).await })
  }

  /// Resume every running execution of this workflow, e.g. after a restart.
  ///
  /// Waits for all of them and returns the terminal records sorted by id.
  /// The first engine error is returned once every execution has stopped.
  pub async fn resume_pending(
    self: &Arc<Self>,
    cancel: &CancellationToken,
  ) -> Result<Vec<Execution>, EngineError> {
    let pending = self.store.list_running(&self.workflow.workflow_id).await?;
    info!(
      workflow_id = %self.workflow.workflow_id,
      count = pending.len(),
      "resuming_executions"
    );

    let mut tasks = JoinSet::new();
    for execution in pending {
      let engine = Arc::clone(self);
      let cancel = cancel.child_token();
      tasks.spawn(async move { engine.run(&execution.execution_id, &cancel).await });
    }

    let mut finished = Vec::new();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(Ok(execution)) => finished.push(execution),
        Ok(Err(e)) => {
          error!(error = %e, "resume_failed");
          first_error.get_or_insert(e);
        }
        Err(e) => {
          first_error.get_or_insert(EngineError::Join {
            message: e.to_string(),
          });
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => {
        finished.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        Ok(finished)
      }
    }
  }
}

fn stage_context(execution: &Execution, stage: &StageSpec) -> StageContext {
  StageContext {
    execution_id: execution.execution_id.clone(),
    workflow_id: execution.workflow_id.clone(),
    generation: execution.generation,
    stage: stage.name.clone(),
    stage_index: execution.current_stage_index,
    attempt: 1,
  }
}
