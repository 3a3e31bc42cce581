//! In-process queue and status store for tests and single-process runs.

use async_trait::async_trait;
use pagecast_core::{DeploymentStatus, JobId, JobQueue, Result, StatusStore};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<JobId>>,
    acked: Mutex<Vec<JobId>>,
    touched: Mutex<Vec<JobId>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids acknowledged so far, in order.
    pub fn acked(&self) -> Vec<JobId> {
        lock(&self.acked).clone()
    }

    /// Ids touched while in progress, one entry per heartbeat.
    pub fn touched(&self) -> Vec<JobId> {
        lock(&self.touched).clone()
    }

    fn pop(&self) -> Option<JobId> {
        lock(&self.jobs).pop_front()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: &JobId) -> Result<()> {
        lock(&self.jobs).push_back(job_id.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Option<Duration>) -> Result<Option<JobId>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(id) = self.pop() {
                return Ok(Some(id));
            }
            match deadline {
                None => self.notify.notified().await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, self.notify.notified())
                        .await
                        .is_err()
                    {
                        return Ok(self.pop());
                    }
                }
            }
        }
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        lock(&self.acked).push(job_id.clone());
        Ok(())
    }

    async fn touch(&self, job_id: &JobId) -> Result<()> {
        lock(&self.touched).push(job_id.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<JobId, DeploymentStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn set_status(&self, job_id: &JobId, status: DeploymentStatus) -> Result<()> {
        lock(&self.statuses).insert(job_id.clone(), status);
        Ok(())
    }

    async fn get_status(&self, job_id: &JobId) -> Result<Option<DeploymentStatus>> {
        Ok(lock(&self.statuses).get(job_id).copied())
    }
}
