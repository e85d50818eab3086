//! Polling publishers: the two loops that feed the pipeline from MySQL.
//!
//! Both run the same adaptive cadence. A productive poll re-polls
//! immediately, draining a backlog as fast as consumers accept it; an empty
//! poll sleeps out the remainder of `max_sleep`, so an idle worker settles
//! near one round-trip per `max_sleep` per publisher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Hooks;
use crate::job::{Task, TaskKind};
use crate::pipeline::{batch_publish, Publish};
use crate::sieve::Sieve;
use crate::store::JobStore;

/// One poll-and-publish cycle of a publisher.
#[async_trait]
pub(crate) trait PollSource: Send {
    /// Label identifying this publisher in logs.
    fn locus(&self) -> &'static str;

    async fn poll_once(&mut self) -> Publish;
}

/// Drive a [`PollSource`] until the pipeline closes or shutdown is signaled.
pub(crate) async fn run_publisher<S: PollSource>(
    mut source: S,
    min_sleep: Duration,
    max_sleep: Duration,
    shutdown: CancellationToken,
) {
    let locus = source.locus();
    info!(locus, "publisher started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let started = Instant::now();
        match source.poll_once().await {
            Publish::Closed => break,
            Publish::Sent(0) => {
                let pause = max_sleep.saturating_sub(started.elapsed()).max(min_sleep);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            Publish::Sent(published) => {
                debug!(locus, published, "published batch");
            }
        }
    }
    info!(locus, "publisher stopped");
}

/// Shared plumbing for the two concrete sources.
pub(crate) struct SourceContext {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) sieve: Arc<Sieve>,
    pub(crate) input: mpsc::Sender<Task>,
    pub(crate) names: Arc<Vec<String>>,
    pub(crate) prefetch: u32,
    pub(crate) hooks: Hooks,
    pub(crate) shutdown: CancellationToken,
}

impl SourceContext {
    /// Exclusion list for one id space, with the sentinel `0` prepended so
    /// the SQL `NOT IN` list is never empty.
    fn exclusion_ids(&self, kind: TaskKind) -> Vec<u64> {
        let mut ids = vec![0];
        ids.extend(self.sieve.ids(kind));
        ids
    }
}

/// Polls `scheduled_jobs` for rows that have come due.
pub(crate) struct SchedulerSource {
    pub(crate) ctx: SourceContext,
}

#[async_trait]
impl PollSource for SchedulerSource {
    fn locus(&self) -> &'static str {
        "scheduler"
    }

    async fn poll_once(&mut self) -> Publish {
        let exclude = self.ctx.exclusion_ids(TaskKind::Scheduled);
        // The round-trip itself must yield to shutdown: a slow database
        // must not hold `stop` past its deadline.
        let polled = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return Publish::Closed,
            polled = self
                .ctx
                .store
                .ready_scheduled_jobs(&self.ctx.names, &exclude, self.ctx.prefetch) => polled,
        };
        match polled {
            Ok(rows) => {
                let tasks = rows.into_iter().map(Task::Scheduled).collect();
                batch_publish(&self.ctx.input, tasks, &self.ctx.shutdown).await
            }
            Err(err) => {
                error!(locus = self.locus(), error = %err, "poll failed");
                self.ctx.hooks.report(&err);
                Publish::Sent(0)
            }
        }
    }
}

/// Polls `jobs` for non-terminal rows abandoned past the stuck threshold.
pub(crate) struct RecoverySource {
    pub(crate) ctx: SourceContext,
    pub(crate) stuck_after: Duration,
}

#[async_trait]
impl PollSource for RecoverySource {
    fn locus(&self) -> &'static str {
        "recovery"
    }

    async fn poll_once(&mut self) -> Publish {
        let exclude = self.ctx.exclusion_ids(TaskKind::Job);
        let polled = tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return Publish::Closed,
            polled = self
                .ctx
                .store
                .stuck_jobs(&self.ctx.names, &exclude, self.stuck_after, self.ctx.prefetch) => polled,
        };
        match polled {
            Ok(rows) => {
                let tasks = rows.into_iter().map(Task::Stuck).collect();
                batch_publish(&self.ctx.input, tasks, &self.ctx.shutdown).await
            }
            Err(err) => {
                error!(locus = self.locus(), error = %err, "poll failed");
                self.ctx.hooks.report(&err);
                Publish::Sent(0)
            }
        }
    }
}
