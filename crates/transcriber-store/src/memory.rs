use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Error, Execution, ExecutionStatus, Store};

#[derive(Default)]
struct Inner {
  active: HashMap<String, Execution>,
  archive: Vec<Execution>,
}

/// In-memory store.
///
/// Nothing survives the process; used for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStore {
  inner: RwLock<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_execution(&self, execution: &Execution) -> Result<(), Error> {
    let mut inner = self.inner.write().await;
    if inner.active.contains_key(&execution.execution_id) {
      return Err(Error::AlreadyExists(execution.execution_id.clone()));
    }
    inner
      .active
      .insert(execution.execution_id.clone(), execution.clone());
    Ok(())
  }

  async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, Error> {
    Ok(self.inner.read().await.active.get(execution_id).cloned())
  }

  async fn save_execution(&self, execution: &Execution) -> Result<(), Error> {
    let mut inner = self.inner.write().await;
    match inner.active.get_mut(&execution.execution_id) {
      Some(existing) => {
        *existing = execution.clone();
        Ok(())
      }
      None => Err(Error::NotFound(execution.execution_id.clone())),
    }
  }

  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, Error> {
    let inner = self.inner.read().await;
    let mut executions: Vec<Execution> = inner
      .active
      .values()
      .filter(|e| e.workflow_id == workflow_id)
      .cloned()
      .collect();
    executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(executions)
  }

  async fn list_running(&self, workflow_id: &str) -> Result<Vec<Execution>, Error> {
    let mut executions = self.list_executions(workflow_id).await?;
    executions.retain(|e| e.status == ExecutionStatus::Running);
    Ok(executions)
  }

  async fn archive_execution(&self, execution_id: &str) -> Result<Execution, Error> {
    let mut inner = self.inner.write().await;
    let execution = inner
      .active
      .get(execution_id)
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))?;
    if !execution.is_terminal() {
      return Err(Error::StillRunning(execution_id.to_string()));
    }

    let execution = inner
      .active
      .remove(execution_id)
      .ok_or_else(|| Error::NotFound(execution_id.to_string()))?;
    inner.archive.push(execution.clone());
    Ok(execution)
  }

  async fn list_archived(&self, execution_id: &str) -> Result<Vec<Execution>, Error> {
    let inner = self.inner.read().await;
    let mut archived: Vec<Execution> = inner
      .archive
      .iter()
      .filter(|e| e.execution_id == execution_id)
      .cloned()
      .collect();
    archived.sort_by_key(|e| e.generation);
    Ok(archived)
  }
}
