//! Execution events and notifiers for observability.
//!
//! Events are emitted at every execution transition so consumers can observe
//! progress, stream it to a UI, feed a result sink, etc.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use transcriber_stage::JobOutcome;
use transcriber_store::{ExecutionStatus, FailureReason};

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A trigger was accepted and a new execution created.
  ExecutionStarted {
    execution_id: String,
    workflow_id: String,
    generation: u32,
  },

  /// A trigger was absorbed by an existing execution.
  DuplicateTrigger {
    execution_id: String,
    status: ExecutionStatus,
  },

  /// A stage has started executing.
  StageStarted {
    execution_id: String,
    stage: String,
    index: usize,
  },

  /// A stage failed transiently and will be retried after `delay_ms`.
  StageRetrying {
    execution_id: String,
    stage: String,
    attempt: u32,
    delay_ms: u64,
    error: String,
  },

  /// A stage has completed successfully.
  StageCompleted {
    execution_id: String,
    stage: String,
    index: usize,
    output: serde_json::Value,
  },

  /// The external job of a polling stage was submitted.
  JobSubmitted {
    execution_id: String,
    stage: String,
    job_name: String,
  },

  /// One status check of an external job finished.
  JobPolled {
    execution_id: String,
    stage: String,
    attempt: u32,
    status: String,
    outcome: JobOutcome,
  },

  /// Every stage completed.
  ExecutionSucceeded { execution_id: String },

  /// The execution stopped with a failure.
  ExecutionFailed {
    execution_id: String,
    reason: FailureReason,
  },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::ExecutionStarted { execution_id, .. }
      | ExecutionEvent::DuplicateTrigger { execution_id, .. }
      | ExecutionEvent::StageStarted { execution_id, .. }
      | ExecutionEvent::StageRetrying { execution_id, .. }
      | ExecutionEvent::StageCompleted { execution_id, .. }
      | ExecutionEvent::JobSubmitted { execution_id, .. }
      | ExecutionEvent::JobPolled { execution_id, .. }
      | ExecutionEvent::ExecutionSucceeded { execution_id }
      | ExecutionEvent::ExecutionFailed { execution_id, .. } => execution_id,
    }
  }
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide
/// what to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// The engine never waits on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
