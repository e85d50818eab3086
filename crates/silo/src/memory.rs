//! In-memory [`JobStore`] for tests and local development.
//!
//! Honors the same uniqueness predicate as the MySQL backend — one child per
//! `(scheduled_job_id, parent_id)` — so race-handling code paths behave the
//! same against it. Rows live in plain vectors behind a mutex; this store is
//! not meant to hold large queues.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{is_ultimate, Job, Params, ScheduledJob};
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    next_job_id: u64,
    next_scheduled_id: u64,
    jobs: Vec<(Job, DateTime<Utc>)>,
    scheduled: Vec<ScheduledJob>,
}

/// Mutex-guarded in-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all job rows, in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.iter().map(|(job, _)| job.clone()).collect()
    }

    /// Snapshot of all scheduled rows, in insertion order.
    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        self.inner.lock().unwrap().scheduled.clone()
    }

    /// Insert a job row with an explicit `updated_at`, bypassing the
    /// uniqueness check. Lets tests plant rows that look abandoned.
    pub fn push_job_backdated(&self, mut job: Job, updated_at: DateTime<Utc>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_job_id += 1;
        let id = inner.next_job_id;
        job.id = Some(id);
        inner.jobs.push((job, updated_at));
        id
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_schemas(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let collision = inner.jobs.iter().any(|(existing, _)| {
            existing.scheduled_job_id == job.scheduled_job_id
                && existing.parent_id == job.parent_id
        });
        if collision {
            return Err(StoreError::Duplicate);
        }
        inner.next_job_id += 1;
        let id = inner.next_job_id;
        let mut row = job.clone();
        row.id = Some(id);
        inner.jobs.push((row, Utc::now()));
        Ok(id)
    }

    async fn insert_scheduled_job(
        &self,
        name: &str,
        status: &str,
        params: &Params,
        scheduled_for: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_scheduled_id += 1;
        let id = inner.next_scheduled_id;
        inner.scheduled.push(ScheduledJob {
            id,
            name: name.to_owned(),
            status: status.to_owned(),
            params: params.clone(),
            scheduled_for,
        });
        Ok(id)
    }

    async fn delete_scheduled_job(&self, id: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.scheduled.retain(|row| row.id != id);
        Ok(())
    }

    async fn ready_scheduled_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        limit: u32,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        let now = Utc::now();
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<ScheduledJob> = inner
            .scheduled
            .iter()
            .filter(|row| {
                row.scheduled_for <= now
                    && names.contains(&row.name)
                    && !exclude.contains(&row.id)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.scheduled_for);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn stuck_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        stuck_after: Duration,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stuck_after)
                .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        let inner = self.inner.lock().unwrap();
        let rows = inner
            .jobs
            .iter()
            .filter(|(job, updated_at)| {
                !is_ultimate(&job.status)
                    && names.contains(&job.name)
                    && !exclude.contains(&job.id.unwrap_or(0))
                    && *updated_at < cutoff
            })
            .map(|(job, _)| job.clone())
            .take(limit as usize)
            .collect();
        Ok(rows)
    }
}
