//! Persistence gateway: the seam between the worker runtime and a database.
//!
//! Each operation is a single round-trip. Backends enforce a uniqueness
//! predicate over `(scheduled_job_id, parent_id)` so that two workers racing
//! to persist the same continuation collide instead of forking the chain;
//! the loser sees [`StoreError::Duplicate`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::job::{Job, Params, ScheduledJob};

/// Typed wrapper over the `jobs` and `scheduled_jobs` tables.
///
/// Implemented for MySQL by the `silo-mysql` crate and in memory by
/// [`crate::memory::MemoryJobStore`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Idempotently create both tables.
    async fn create_schemas(&self) -> Result<(), StoreError>;

    /// Insert a job row and return its primary key.
    ///
    /// Fails with [`StoreError::Duplicate`] when the uniqueness predicate
    /// rejects the row.
    async fn insert_job(&self, job: &Job) -> Result<u64, StoreError>;

    /// Insert a scheduled row and return its primary key.
    async fn insert_scheduled_job(
        &self,
        name: &str,
        status: &str,
        params: &Params,
        scheduled_for: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete a scheduled row. Idempotent: deleting a missing id succeeds.
    async fn delete_scheduled_job(&self, id: u64) -> Result<(), StoreError>;

    /// Up to `limit` scheduled rows with `scheduled_for <= now`, a name in
    /// `names`, and an id not in `exclude`. Ordered by `scheduled_for`
    /// ascending; callers must not rely on the ordering.
    ///
    /// `exclude` is never empty: callers prepend a sentinel `0`.
    async fn ready_scheduled_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        limit: u32,
    ) -> Result<Vec<ScheduledJob>, StoreError>;

    /// Up to `limit` job rows in a non-terminal status, with a name in
    /// `names`, an id not in `exclude`, and an `updated_at` older than
    /// `stuck_after` — work abandoned by a crashed worker.
    async fn stuck_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        stuck_after: Duration,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError>;
}
