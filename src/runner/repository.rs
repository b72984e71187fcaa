//! Run storage behind an injectable interface.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{ExecutionRun, RunSummary};
use crate::error::{EngineError, EngineResult};

/// Where runs live while and after they execute
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Store a new run; fails if the id is taken
    async fn create(&self, run: ExecutionRun) -> EngineResult<()>;

    async fn get(&self, id: Uuid) -> Option<ExecutionRun>;

    /// Replace a stored run; fails if it was never created
    async fn update(&self, run: &ExecutionRun) -> EngineResult<()>;

    /// Summaries ordered by creation time
    async fn list(&self) -> Vec<RunSummary>;
}

/// Process-local repository. Runs are kept until the process exits.
#[derive(Clone, Default)]
pub struct InMemoryRunRepository {
    runs: Arc<RwLock<HashMap<Uuid, ExecutionRun>>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create(&self, run: ExecutionRun) -> EngineResult<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(EngineError::Config(format!("run {} already exists", run.id)));
        }
        runs.insert(run.id, run);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<ExecutionRun> {
        self.runs.read().await.get(&id).cloned()
    }

    async fn update(&self, run: &ExecutionRun) -> EngineResult<()> {
        match self.runs.write().await.get_mut(&run.id) {
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => Err(EngineError::RunNotFound(run.id.to_string())),
        }
    }

    async fn list(&self) -> Vec<RunSummary> {
        let runs = self.runs.read().await;
        let mut all: Vec<&ExecutionRun> = runs.values().collect();
        all.sort_by_key(|r| r.created_at);
        all.into_iter().map(ExecutionRun::summary).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::types::RunStatus;

    #[tokio::test]
    async fn test_create_get_update_list() {
        let repo = InMemoryRunRepository::new();
        let mut run = ExecutionRun::queued(vec!["登录成功".into()]);
        repo.create(run.clone()).await.unwrap();
        assert!(repo.create(run.clone()).await.is_err());

        run.status = RunStatus::Running;
        repo.update(&run).await.unwrap();
        assert_eq!(repo.get(run.id).await.unwrap().status, RunStatus::Running);

        let listed = repo.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, run.id);
    }

    #[tokio::test]
    async fn test_update_unknown_run_fails() {
        let repo = InMemoryRunRepository::new();
        let run = ExecutionRun::queued(Vec::new());
        let err = repo.update(&run).await.unwrap_err();
        assert!(matches!(err, EngineError::RunNotFound(_)));
        assert!(repo.get(run.id).await.is_none());
    }
}
