//! Workflow runner with channel-based triggering.
//!
//! The `WorkflowRunner` owns an mpsc channel of artifact arrival events and
//! starts one execution per event using the `ExecutionEngine`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use transcriber_store::Execution;
use transcriber_trigger::ArtifactArrived;

use crate::engine::{ExecutionEngine, StartOutcome};
use crate::error::EngineError;
use crate::events::{ExecutionNotifier, NoopNotifier};

/// `None` when the event was absorbed or rejected instead of starting a run.
type RunResult = Result<Option<Execution>, EngineError>;

/// A runner that starts executions in response to arrival events.
///
/// # Usage
///
/// ```ignore
/// let runner = WorkflowRunner::new(engine);
///
/// // Get sender for the trigger adapter
/// let sender = runner.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// runner.start(cancel).await?;
/// ```
pub struct WorkflowRunner<N: ExecutionNotifier + 'static = NoopNotifier> {
  sender: mpsc::Sender<ArtifactArrived>,
  receiver: mpsc::Receiver<ArtifactArrived>,
  engine: Arc<ExecutionEngine<N>>,
}

impl<N: ExecutionNotifier + 'static> WorkflowRunner<N> {
  pub fn new(engine: Arc<ExecutionEngine<N>>) -> Self {
    Self::with_buffer_size(engine, 100)
  }

  /// Create a new workflow runner with a custom buffer size.
  pub fn with_buffer_size(engine: Arc<ExecutionEngine<N>>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      engine,
    }
  }

  /// Get a sender handle for delivering arrival events.
  pub fn sender(&self) -> mpsc::Sender<ArtifactArrived> {
    self.sender.clone()
  }

  /// Deliver an arrival event through the runner's channel.
  pub async fn trigger(&self, event: ArtifactArrived) -> Result<(), EngineError> {
    self
      .sender
      .send(event)
      .await
      .map_err(|_| EngineError::ChannelClosed)
  }

  pub fn engine(&self) -> &Arc<ExecutionEngine<N>> {
    &self.engine
  }

  /// Start the execution loop.
  ///
  /// Executions left running by a previous process are resumed first. The
  /// loop ends when the cancellation token fires or every sender is dropped;
  /// in-flight executions are then awaited (cancelled ones stay resumable).
  pub async fn start(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
    let workflow_id = self.engine.workflow().workflow_id.clone();
    info!(
      workflow_id = %workflow_id,
      workflow_name = %self.engine.workflow().name,
      "starting workflow runner"
    );

    // Keep our own sender from holding the channel open
    drop(self.sender);

    let mut tasks: JoinSet<RunResult> = JoinSet::new();
    for execution in self.engine.store().list_running(&workflow_id).await? {
      spawn_run(&self.engine, &mut tasks, execution.execution_id, &cancel);
    }

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!(workflow_id = %workflow_id, "workflow runner cancelled");
          break;
        }
        Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_finished(joined),
        event = self.receiver.recv() => match event {
          Some(event) => dispatch(&self.engine, &mut tasks, event, &cancel),
          None => {
            info!(workflow_id = %workflow_id, "workflow runner channel closed");
            break;
          }
        },
      }
    }

    while let Some(joined) = tasks.join_next().await {
      log_finished(joined);
    }

    Ok(())
  }
}

/// Start and run the execution for `event` on the task set, so a slow start
/// never stalls the loop.
fn dispatch<N: ExecutionNotifier + 'static>(
  engine: &Arc<ExecutionEngine<N>>,
  tasks: &mut JoinSet<RunResult>,
  event: ArtifactArrived,
  cancel: &CancellationToken,
) {
  let engine = Arc::clone(engine);
  let cancel = cancel.child_token();
  tasks.spawn(async move {
    let location = event.source_location();
    match engine.start_trigger(event).await {
      Ok(StartOutcome::Started(execution)) => {
        engine.run(&execution.execution_id, &cancel).await.map(Some)
      }
      // Running duplicates are already driven by the task that started them
      Ok(StartOutcome::Duplicate(_)) => Ok(None),
      Err(e) => {
        warn!(location = %location, error = %e, "trigger_rejected");
        Ok(None)
      }
    }
  });
}

fn spawn_run<N: ExecutionNotifier + 'static>(
  engine: &Arc<ExecutionEngine<N>>,
  tasks: &mut JoinSet<RunResult>,
  execution_id: String,
  cancel: &CancellationToken,
) {
  let engine = Arc::clone(engine);
  let cancel = cancel.child_token();
  tasks.spawn(async move { engine.run(&execution_id, &cancel).await.map(Some) });
}

fn log_finished(joined: Result<RunResult, tokio::task::JoinError>) {
  match joined {
    Ok(Ok(None)) => {}
    Ok(Ok(Some(execution))) => {
      info!(
        execution_id = %execution.execution_id,
        status = ?execution.status,
        "workflow execution finished"
      );
    }
    Ok(Err(EngineError::Cancelled)) => {
      info!("workflow execution cancelled");
    }
    Ok(Err(e)) => {
      error!(error = %e, "workflow execution errored");
    }
    Err(e) => {
      error!(error = %e, "workflow execution task failed");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use chrono::Utc;
  use std::time::Duration;
  use transcriber_stage::{Payload, Stage, StageContext, StageError};
  use transcriber_store::{ExecutionStatus, MemoryStore};
  use transcriber_workflow::WorkflowDefinition;

  struct Echo;

  #[async_trait]
  impl Stage for Echo {
    async fn invoke(&self, _ctx: &StageContext, payload: &Payload) -> Result<Payload, StageError> {
      let location = payload.require_str("sourceLocation")?;
      Ok(Payload::new().with("echoed", location))
    }
  }

  fn create_test_engine() -> Arc<ExecutionEngine> {
    let workflow = WorkflowDefinition::builder("test-workflow", "Test Workflow")
      .invoke("echo", Arc::new(Echo))
      .build()
      .unwrap();
    Arc::new(ExecutionEngine::new(
      Arc::new(workflow),
      Arc::new(MemoryStore::new()),
    ))
  }

  #[tokio::test]
  async fn test_sender_cloning() {
    let runner = WorkflowRunner::new(create_test_engine());

    let sender1 = runner.sender();
    let sender2 = runner.sender();

    assert!(!sender1.is_closed());
    assert!(!sender2.is_closed());
  }

  #[tokio::test]
  async fn test_runs_events_until_channel_closes() {
    let engine = create_test_engine();
    let runner = WorkflowRunner::new(Arc::clone(&engine));
    let sender = runner.sender();

    let event = ArtifactArrived::new("uploads", "a.mp3", Utc::now());
    let execution_id = event.trigger_id();
    sender.send(event.clone()).await.unwrap();
    // Re-delivery of the same arrival
    sender.send(event).await.unwrap();
    drop(sender);

    runner.start(CancellationToken::new()).await.unwrap();

    let executions = engine.list().await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].execution_id, execution_id);
    assert_eq!(executions[0].status, ExecutionStatus::Succeeded);
    assert_eq!(executions[0].payload.get_str("echoed"), Some("uploads/a.mp3"));
  }

  #[tokio::test]
  async fn test_cancellation() {
    let runner = WorkflowRunner::new(create_test_engine());
    let _sender = runner.sender();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let handle = tokio::spawn(async move { runner.start(cancel_clone).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let result = handle.await.unwrap();
    assert!(result.is_ok());
  }
}
