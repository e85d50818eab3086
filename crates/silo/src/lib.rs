//! # Silo
//!
//! A durable, SQL-backed job queue with scheduled jobs, multi-stage
//! continuations, crash recovery, and bounded concurrent execution.
//!
//! ## Core Concepts
//!
//! Work is a chain of **immutable records**:
//! - [`ScheduledJob`] = deferred intent (run `name` starting in `status` at
//!   `scheduled_for`)
//! - [`Job`] = one execution record; each handler step *begets* the next row
//!
//! The key principle: **every transition is its own durable row**. Nothing
//! is updated in place; a crash loses at most the step in flight, and the
//! recovery publisher begets a continuation from the last persisted row.
//!
//! ## Architecture
//!
//! ```text
//! schedule()
//!     │
//!     ▼ insert
//! scheduled_jobs ◄──────────── cleanup on terminal status
//!     │                                          ▲
//!     ▼ poll (due rows)                          │
//! scheduler publisher ──┐                        │
//!                       ├─► dedup forwarder ──► consumer pool
//! recovery publisher ───┘        │                │
//!     ▲ poll (stuck rows)        ▼ sieve          ▼ handler step
//!     │                    (in-flight ids)   insert continuation
//!     └────────────────────── jobs ◄──────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Rows are facts** — a persisted job row is never mutated, only
//!    succeeded by a child row
//! 2. **One parent, one child** — the schema's uniqueness predicate makes
//!    racing workers collide instead of forking a chain
//! 3. **At-least-once** — handlers may re-run a `(status, params)` step and
//!    must be idempotent at that granularity
//! 4. **Bounded retries** — a same-status run past [`MAX_RETRIES`] begets a
//!    `failed` row
//! 5. **Cooperative shutdown** — closing the pipeline input drains every
//!    loop; in-flight handlers are never interrupted
//!
//! ## Example
//!
//! ```ignore
//! use silo::{schedule, HandlerMap, Step, Worker, WorkerConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(silo_mysql::MySqlJobStore::new(pool));
//! silo::initialize(store.as_ref()).await?;
//!
//! let handlers = HandlerMap::new().bind("ship-order", |status, params| async move {
//!     match status.as_str() {
//!         "start" => Ok(Step::advance("charged", params)),
//!         "charged" => Ok(Step::done()),
//!         other => anyhow::bail!("unexpected status {other}"),
//!     }
//! });
//!
//! schedule(store.as_ref(), "ship-order", "start", params, chrono::Utc::now()).await?;
//!
//! let worker = Worker::start(store, handlers, WorkerConfig::default());
//! // ... later
//! worker.stop(std::time::Duration::from_secs(30)).await;
//! ```
//!
//! ## What This Is Not
//!
//! Silo is **not**:
//! - A distributed consensus system (it leans on the database's row
//!   semantics, nothing more)
//! - Exactly-once (idempotent handlers are the contract)
//! - Ordered or prioritized (no guarantees across jobs)

// Core modules
mod consumer;
mod error;
mod executor;
mod handler;
mod job;
mod pipeline;
mod publisher;
mod schedule;
mod sieve;
mod store;
mod worker;

// In-memory store for tests and local development
pub mod memory;

// Re-export model types
pub use crate::job::{
    is_ultimate, Job, Params, ScheduledJob, Task, TaskKind, MAX_RETRIES, STATUS_CANCELED,
    STATUS_DONE, STATUS_FAILED, ULTIMATE_STATUSES,
};

// Re-export the persistence seam
pub use crate::store::JobStore;

// Re-export error types
pub use crate::error::{ErrorHook, StoreError};

// Re-export handler registration
pub use crate::handler::{HandlerMap, Step};

// Re-export the worker lifecycle
pub use crate::worker::{Worker, WorkerConfig};

// Re-export client operations
pub use crate::schedule::{initialize, schedule, unschedule};

// Re-export commonly used external types
pub use async_trait::async_trait;
