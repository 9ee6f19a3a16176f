//! Persistence seams for executions and jobs.
//!
//! The engine treats storage as a synchronous key-value/document contract:
//! create/find/update by id, indexed lookup by `(execution_id, status)` and
//! by `prediction_id` (unique). `MemoryStore` backs tests and offline runs;
//! a database-backed implementation slots in behind the same traits.

use async_trait::async_trait;
use gencore::{Execution, ExecutionId, Job, JobId, JobStatus, StoreError};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError>;
    async fn get_execution(&self, id: ExecutionId) -> Result<Execution, StoreError>;
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn get_job(&self, id: JobId) -> Result<Job, StoreError>;

    /// Rejects `DuplicatePrediction` if the job's `prediction_id` is
    /// already registered to a different job.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn find_jobs(
        &self,
        execution_id: ExecutionId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError>;

    async fn find_job_by_prediction(&self, prediction_id: &str)
        -> Result<Option<Job>, StoreError>;
}

/// Combined store handle used by the coordinator.
pub trait Store: ExecutionStore + JobStore {}
impl<T: ExecutionStore + JobStore> Store for T {}

#[derive(Default)]
struct MemoryInner {
    executions: HashMap<ExecutionId, Execution>,
    jobs: HashMap<JobId, Job>,
    by_prediction: HashMap<String, JobId>,
}

/// In-memory store with the same uniqueness guarantees a real index would
/// enforce.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<Execution, StoreError> {
        let inner = self.inner.read().await;
        inner
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.executions.contains_key(&execution.id) {
            return Err(StoreError::ExecutionNotFound(execution.id));
        }
        inner.executions.insert(execution.id, execution.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        let inner = self.inner.read().await;
        inner.jobs.get(&id).cloned().ok_or(StoreError::JobNotFound(id))
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id));
        }
        if let Some(prediction_id) = &job.prediction_id {
            match inner.by_prediction.get(prediction_id) {
                Some(owner) if *owner != job.id => {
                    return Err(StoreError::DuplicatePrediction(prediction_id.clone()));
                }
                Some(_) => {}
                None => {
                    inner.by_prediction.insert(prediction_id.clone(), job.id);
                }
            }
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find_jobs(
        &self,
        execution_id: ExecutionId,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.execution_id == execution_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(jobs)
    }

    async fn find_job_by_prediction(
        &self,
        prediction_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_prediction
            .get(prediction_id)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gencore::Execution;
    use uuid::Uuid;

    #[tokio::test]
    async fn prediction_id_is_unique_across_jobs() {
        let store = MemoryStore::new();
        let execution = Execution::new(Uuid::new_v4());
        store.insert_execution(&execution).await.unwrap();

        let mut first = Job::new(execution.id, "a".to_string());
        let mut second = Job::new(execution.id, "b".to_string());
        store.insert_job(&first).await.unwrap();
        store.insert_job(&second).await.unwrap();

        first.prediction_id = Some("p1".to_string());
        store.update_job(&first).await.unwrap();

        second.prediction_id = Some("p1".to_string());
        let err = store.update_job(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePrediction(_)));

        let found = store.find_job_by_prediction("p1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn find_jobs_filters_by_status() {
        let store = MemoryStore::new();
        let execution = Execution::new(Uuid::new_v4());
        store.insert_execution(&execution).await.unwrap();

        let mut a = Job::new(execution.id, "a".to_string());
        a.status = JobStatus::Succeeded;
        let b = Job::new(execution.id, "b".to_string());
        store.insert_job(&a).await.unwrap();
        store.insert_job(&b).await.unwrap();

        let succeeded = store
            .find_jobs(execution.id, Some(JobStatus::Succeeded))
            .await
            .unwrap();
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].node_id, "a");

        let all = store.find_jobs(execution.id, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
