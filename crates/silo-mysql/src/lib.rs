//! MySQL implementation of the silo job store.
//!
//! This crate provides the production `JobStore` backend on top of a
//! `sqlx` MySQL pool.
//!
//! # Features
//!
//! - Duplicate-continuation detection via a uniqueness predicate, mapped to
//!   the benign-conflict error the worker runtime expects
//! - Stuck-row discovery by `updated_at` age
//! - Parameters persisted as canonical JSON text (NULL for the null payload)
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS scheduled_jobs (
//!     id            BIGINT UNSIGNED NOT NULL PRIMARY KEY AUTO_INCREMENT,
//!     name          VARCHAR(191) NOT NULL,
//!     status        VARCHAR(191) NOT NULL,
//!     parameters    BLOB,
//!     scheduled_for TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
//!     KEY scheduled_jobs_scheduled_for_idx (scheduled_for)
//! );
//!
//! CREATE TABLE IF NOT EXISTS jobs (
//!     id               BIGINT UNSIGNED NOT NULL PRIMARY KEY AUTO_INCREMENT,
//!     scheduled_job_id BIGINT UNSIGNED NOT NULL,
//!     parent_id        BIGINT UNSIGNED NOT NULL,
//!     name             VARCHAR(191) NOT NULL,
//!     status           VARCHAR(191) NOT NULL,
//!     parameters       BLOB,
//!     attempt          INT UNSIGNED NOT NULL DEFAULT 1,
//!     updated_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
//!                          ON UPDATE CURRENT_TIMESTAMP,
//!     UNIQUE KEY jobs_lineage_uniq (scheduled_job_id, parent_id),
//!     KEY jobs_updated_at_idx (updated_at)
//! );
//! ```
//!
//! `jobs_lineage_uniq` is what makes racing workers safe: every row is the
//! unique child of its parent within a scheduled lineage, so two workers
//! persisting the same continuation collide and the loser backs off.
//!
//! # Usage
//!
//! ```rust,ignore
//! use silo_mysql::MySqlJobStore;
//! use sqlx::MySqlPool;
//!
//! let pool = MySqlPool::connect("mysql://localhost/mydb").await?;
//! let store = std::sync::Arc::new(MySqlJobStore::new(pool));
//!
//! silo::initialize(store.as_ref()).await?;
//! let worker = silo::Worker::start(store, handlers, Default::default());
//! ```

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use silo::{Job, JobStore, Params, ScheduledJob, StoreError, ULTIMATE_STATUSES};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, QueryBuilder, Row};

const CREATE_SCHEDULED_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id            BIGINT UNSIGNED NOT NULL PRIMARY KEY AUTO_INCREMENT,
    name          VARCHAR(191) NOT NULL,
    status        VARCHAR(191) NOT NULL,
    parameters    BLOB,
    scheduled_for TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    KEY scheduled_jobs_scheduled_for_idx (scheduled_for)
)
"#;

const CREATE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id               BIGINT UNSIGNED NOT NULL PRIMARY KEY AUTO_INCREMENT,
    scheduled_job_id BIGINT UNSIGNED NOT NULL,
    parent_id        BIGINT UNSIGNED NOT NULL,
    name             VARCHAR(191) NOT NULL,
    status           VARCHAR(191) NOT NULL,
    parameters       BLOB,
    attempt          INT UNSIGNED NOT NULL DEFAULT 1,
    updated_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
                         ON UPDATE CURRENT_TIMESTAMP,
    UNIQUE KEY jobs_lineage_uniq (scheduled_job_id, parent_id),
    KEY jobs_updated_at_idx (updated_at)
)
"#;

/// MySQL job store.
#[derive(Clone)]
pub struct MySqlJobStore {
    pool: MySqlPool,
}

impl MySqlJobStore {
    /// Create a store over an existing connection pool. The pool is held for
    /// the store's lifetime; sizing it is the caller's concern.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for MySqlJobStore {
    async fn create_schemas(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_SCHEDULED_JOBS)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        sqlx::query(CREATE_JOBS)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (scheduled_job_id, parent_id, name, status, parameters, attempt)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.scheduled_job_id)
        .bind(job.parent_id)
        .bind(&job.name)
        .bind(&job.status)
        .bind(encode_params(&job.params)?)
        .bind(job.attempt)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_id()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate)
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn insert_scheduled_job(
        &self,
        name: &str,
        status: &str,
        params: &Params,
        scheduled_for: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (name, status, parameters, scheduled_for)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(status)
        .bind(encode_params(params)?)
        .bind(scheduled_for)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(done.last_insert_id())
    }

    async fn delete_scheduled_job(&self, id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn ready_scheduled_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        limit: u32,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<MySql>::new(
            "SELECT id, name, status, parameters, scheduled_for \
             FROM scheduled_jobs WHERE scheduled_for <= NOW() AND name IN ",
        );
        push_id_list(push_name_list(&mut query, names).push(" AND id NOT IN "), exclude)
            .push(" ORDER BY scheduled_for ASC LIMIT ")
            .push_bind(limit);

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(scheduled_from_row).collect()
    }

    async fn stuck_jobs(
        &self,
        names: &[String],
        exclude: &[u64],
        stuck_after: Duration,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stuck_after).map_err(|e| StoreError::Backend(anyhow!(e)))?;

        let mut query = QueryBuilder::<MySql>::new(
            "SELECT id, scheduled_job_id, parent_id, name, status, parameters, attempt \
             FROM jobs WHERE status NOT IN ",
        );
        {
            let mut statuses = query.separated(", ");
            statuses.push_unseparated("(");
            for status in ULTIMATE_STATUSES {
                statuses.push_bind(status);
            }
            statuses.push_unseparated(")");
        }
        query.push(" AND name IN ");
        push_id_list(push_name_list(&mut query, names).push(" AND id NOT IN "), exclude)
            .push(" AND updated_at < ")
            .push_bind(cutoff)
            .push(" LIMIT ")
            .push_bind(limit);

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(job_from_row).collect()
    }
}

/// Utility queries outside the worker runtime's needs.
impl MySqlJobStore {
    /// Row counts by status bucket, for dashboards and health checks.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let scheduled = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scheduled_jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(CASE WHEN status NOT IN ('canceled', 'failed', 'done') THEN 1 END) AS active,
                COUNT(CASE WHEN status = 'done' THEN 1 END) AS done,
                COUNT(CASE WHEN status = 'failed' THEN 1 END) AS failed,
                COUNT(CASE WHEN status = 'canceled' THEN 1 END) AS canceled
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(QueueStats {
            scheduled,
            active: row.get("active"),
            done: row.get("done"),
            failed: row.get("failed"),
            canceled: row.get("canceled"),
        })
    }
}

/// Job queue statistics.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub scheduled: i64,
    pub active: i64,
    pub done: i64,
    pub failed: i64,
    pub canceled: i64,
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

fn push_name_list<'a>(
    query: &'a mut QueryBuilder<'static, MySql>,
    names: &[String],
) -> &'a mut QueryBuilder<'static, MySql> {
    let mut list = query.separated(", ");
    list.push_unseparated("(");
    for name in names {
        list.push_bind(name.clone());
    }
    list.push_unseparated(")");
    query
}

/// `ids` is never empty on the worker's paths (publishers prepend a sentinel
/// 0), but guard anyway so the SQL stays well-formed.
fn push_id_list<'a>(
    query: &'a mut QueryBuilder<'static, MySql>,
    ids: &[u64],
) -> &'a mut QueryBuilder<'static, MySql> {
    let mut list = query.separated(", ");
    list.push_unseparated("(");
    if ids.is_empty() {
        list.push_bind(0u64);
    }
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");
    query
}

/// Parameters are stored as JSON text; the null payload is a SQL NULL.
fn encode_params(params: &Params) -> Result<Option<String>, StoreError> {
    if params.is_null() {
        return Ok(None);
    }
    serde_json::to_string(params)
        .map(Some)
        .map_err(|e| StoreError::Backend(e.into()))
}

fn decode_params(raw: Option<Vec<u8>>) -> Result<Params, StoreError> {
    match raw {
        None => Ok(Params::Null),
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Backend(e.into())),
    }
}

fn scheduled_from_row(row: MySqlRow) -> Result<ScheduledJob, StoreError> {
    Ok(ScheduledJob {
        id: row.get("id"),
        name: row.get("name"),
        status: row.get("status"),
        params: decode_params(row.get("parameters"))?,
        scheduled_for: row.get("scheduled_for"),
    })
}

fn job_from_row(row: MySqlRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: Some(row.get("id")),
        scheduled_job_id: row.get("scheduled_job_id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        status: row.get("status"),
        params: decode_params(row.get("parameters"))?,
        attempt: row.get("attempt"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_round_trip_over_all_supported_shapes() {
        let shapes = [
            json!(null),
            json!(true),
            json!(false),
            json!(42),
            json!(-7),
            json!(2.5),
            json!("text"),
            json!([1, "two", null, [3.0]]),
            json!({"name": "world", "nested": {"n": 1, "seq": [true, null]}}),
        ];
        for params in shapes {
            let encoded = encode_params(&params).unwrap();
            let decoded = decode_params(encoded.map(String::into_bytes)).unwrap();
            assert_eq!(decoded, params);
        }
    }

    #[test]
    fn null_params_become_sql_null() {
        assert_eq!(encode_params(&json!(null)).unwrap(), None);
        assert_eq!(decode_params(None).unwrap(), json!(null));
    }

    #[test]
    fn malformed_stored_params_surface_as_backend_errors() {
        let err = decode_params(Some(b"{not json".to_vec())).unwrap_err();
        assert!(!err.is_duplicate());
    }
}
