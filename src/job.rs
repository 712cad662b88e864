//! Job bookkeeping for the async detection API. A [`Job`] is owned
//! exclusively by the orchestrator: created on submission, mutated only by
//! the worker task handling it, and read by status/result queries through a
//! shared, coarse-grained lock (the hot path is read-heavy, per the design
//! notes).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::DetectionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A job as seen by the orchestrator: the full, non-serializable record,
/// including the result payload and the cancellation token. Status queries
/// go through [`JobView`] instead, which is the wire-safe projection.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub current_stage: Option<String>,
    pub result: Option<DetectionResult>,
    pub error: Option<String>,
    pub cancellation: CancellationToken,
}

impl Job {
    pub fn new(job_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            current_stage: None,
            result: None,
            error: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            current_stage: self.current_stage.clone(),
            error: self.error.clone(),
        }
    }
}

/// The wire-safe status projection returned by `get_job_status`. Carries no
/// result payload — that is only available once `status == Completed`,
/// through `get_job_result`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub current_stage: Option<String>,
    pub error: Option<String>,
}

/// Shared, coarse-locked job map. Mutated only by the worker handling a
/// given job; readers take a snapshot under the lock and release it
/// immediately, so status polling never blocks a running job.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        self.inner.write().await.insert(job.job_id, job);
    }

    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        self.inner.read().await.get(&job_id).cloned()
    }

    pub async fn update<F: FnOnce(&mut Job)>(&self, job_id: Uuid, f: F) {
        if let Some(job) = self.inner.write().await.get_mut(&job_id) {
            f(job);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_roundtrips_progress_updates() {
        let store = JobStore::new();
        let job_id = Uuid::new_v4();
        store.insert(Job::new(job_id, Utc::now())).await;

        store
            .update(job_id, |job| {
                job.status = JobStatus::Running;
                job.progress = 0.25;
                job.current_stage = Some("temporal_analysis".to_string());
            })
            .await;

        let job = store.get(job_id).await.expect("job present");
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 0.25);
        assert_eq!(job.current_stage.as_deref(), Some("temporal_analysis"));
    }

    #[tokio::test]
    async fn missing_job_returns_none() {
        let store = JobStore::new();
        assert!(store.get(Uuid::new_v4()).await.is_none());
    }
}
