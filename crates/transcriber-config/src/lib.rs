//! Transcriber Config
//!
//! This crate contains the serializable workflow configuration types for
//! transcriber. These types describe a workflow before it is resolved into an
//! immutable definition by `transcriber-workflow`.
//!
//! Configuration is loaded from JSON files (via the CLI) and consists of:
//! - the ordered list of stages ([`StageDef`])
//! - engine-wide settings such as retry budgets and the active job cap ([`EngineSettings`])

mod engine;
mod error;
mod stage;
mod workflow;

pub use engine::{EngineSettings, RetryDef};
pub use error::ConfigError;
pub use stage::{PollingDef, StageConfig, StageDef, StageKindDef, UnrecognizedStatus};
pub use workflow::WorkflowDef;
