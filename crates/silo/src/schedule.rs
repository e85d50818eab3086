//! Client-facing operations on the queue: create schemas, enqueue deferred
//! work, cancel it before it runs.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StoreError;
use crate::job::Params;
use crate::store::JobStore;

/// Idempotently create the `jobs` and `scheduled_jobs` tables.
pub async fn initialize(store: &dyn JobStore) -> Result<(), StoreError> {
    store.create_schemas().await
}

/// Persist a scheduled job that becomes runnable at or after `due_at`, and
/// return its id.
///
/// `name` must match a handler bound by some worker, and `status` is the
/// status its root job starts in. Both are bare identifier strings.
pub async fn schedule(
    store: &dyn JobStore,
    name: &str,
    status: &str,
    params: Params,
    due_at: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let id = store
        .insert_scheduled_job(name, status, &params, due_at)
        .await?;
    debug!(scheduled_job_id = id, name, status, due_at = %due_at, "scheduled job");
    Ok(id)
}

/// Cancel a scheduled job that has not started. Idempotent; a no-op for ids
/// whose chain is already running (the chain itself is not interrupted).
pub async fn unschedule(store: &dyn JobStore, id: u64) -> Result<(), StoreError> {
    store.delete_scheduled_job(id).await?;
    debug!(scheduled_job_id = id, "unscheduled job");
    Ok(())
}
