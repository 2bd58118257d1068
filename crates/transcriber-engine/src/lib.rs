//! Transcriber Execution Engine
//!
//! This crate drives executions of a [`WorkflowDefinition`] to a terminal
//! state: an ordered pipeline of invoke stages plus submit-then-poll external
//! jobs, with durable records, idempotent starts and bounded retries.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                         │
//! │  - owns mpsc channel of ArtifactArrived events              │
//! │  - start(cancel) resumes pending runs, then loops           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutionEngine                         │
//! │  - start(request) → Started | Duplicate                     │
//! │  - advance(id) runs one stage, persists the transition      │
//! │  - per-execution lock, active-job semaphore                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        JobPoller                            │
//! │  - submit once, then wait → check → classify                │
//! │  - attempt cap, deadline, unrecognized-status cap           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use transcriber_engine::{ExecutionEngine, WorkflowRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = Arc::new(ExecutionEngine::new(workflow, store));
//!
//! let outcome = engine.start_trigger(event).await?;
//! let execution = engine.run(&outcome.execution().execution_id, &cancel).await?;
//! ```
//!
//! [`WorkflowDefinition`]: transcriber_workflow::WorkflowDefinition

mod backoff;
mod engine;
mod error;
mod events;
mod poller;
mod retry;
mod runner;

pub use backoff::{Backoff, RetryBudget};
pub use engine::{ExecutionEngine, StartOutcome};
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use poller::job_id;
pub use runner::WorkflowRunner;

pub use transcriber_store::{Execution, ExecutionStatus, FailureReason};
