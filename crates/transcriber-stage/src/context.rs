use serde::{Deserialize, Serialize};

/// Identity of the stage invocation currently being run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageContext {
  pub execution_id: String,
  pub workflow_id: String,
  /// Bumped whenever a terminated execution is restarted for a changed artifact.
  pub generation: u32,
  pub stage: String,
  pub stage_index: usize,
  /// 1-based invocation attempt within the transient retry budget.
  pub attempt: u32,
}
