//! Transcriber Workflow
//!
//! This crate provides the resolved workflow representation. A
//! [`WorkflowDefinition`] is an ordered, validated, immutable list of stages
//! built once at startup and shared read-only by every execution.
//!
//! Key differences from `transcriber-config`:
//! - Stages are bound to their implementations ([`Stage`] / [`PollingJob`])
//! - Polling settings are converted into durations and a status classifier
//! - Structural invariants are checked (non-empty, unique names, at most one polling stage)

mod error;
mod registry;
mod stage;
mod workflow;

pub use error::WorkflowError;
pub use registry::StageRegistry;
pub use stage::{PollingSpec, StageKind, StageSpec};
pub use workflow::{WorkflowBuilder, WorkflowDefinition};

pub use transcriber_stage::{PollingJob, Stage};
