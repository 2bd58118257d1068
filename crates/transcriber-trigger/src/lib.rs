//! Transcriber Trigger
//!
//! Converts artifact arrival events into workflow start requests. The trigger
//! id derived here is what makes re-delivery of the same arrival start at most
//! one execution.

mod types;

pub use types::{ArtifactArrived, StartRequest, TriggerError};
