//! The executor: advances a single task exactly one step.

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use crate::error::{Hooks, StoreError};
use crate::handler::{HandlerMap, Step};
use crate::job::{Job, Params, Task, STATUS_DONE};
use crate::store::JobStore;

pub(crate) struct Executor {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerMap>,
    hooks: Hooks,
}

impl Executor {
    pub(crate) fn new(store: Arc<dyn JobStore>, handlers: Arc<HandlerMap>, hooks: Hooks) -> Self {
        Self {
            store,
            handlers,
            hooks,
        }
    }

    /// Advance `task` one step and return the persisted continuation, if any.
    ///
    /// `Ok(None)` means the chain left this worker's hands: terminal cleanup
    /// ran, or another worker won the race to persist the continuation.
    /// Executing a terminal job *is* the cleanup step — it deletes the
    /// originating scheduled row and ends the chain.
    pub(crate) async fn execute(&self, task: Task) -> Result<Option<Job>, StoreError> {
        match task {
            Task::Scheduled(scheduled) => {
                info!(
                    scheduled_job_id = scheduled.id,
                    name = %scheduled.name,
                    status = %scheduled.status,
                    "starting scheduled job"
                );
                self.persist(scheduled.beget()).await
            }
            Task::Stuck(stuck) => {
                warn!(
                    job_id = stuck.id.unwrap_or(0),
                    name = %stuck.name,
                    status = %stuck.status,
                    attempt = stuck.attempt,
                    "recovering stuck job"
                );
                self.persist(stuck.retry()).await
            }
            Task::Job(job) if job.is_finished() => {
                if job.scheduled_job_id != 0 {
                    self.store.delete_scheduled_job(job.scheduled_job_id).await?;
                }
                debug!(
                    job_id = job.id.unwrap_or(0),
                    name = %job.name,
                    status = %job.status,
                    "job chain finished"
                );
                Ok(None)
            }
            Task::Job(job) => self.step(job).await,
        }
    }

    /// Run the handler for a non-terminal job and persist its verdict.
    async fn step(&self, job: Job) -> Result<Option<Job>, StoreError> {
        let Some(handler) = self.handlers.get(&job.name) else {
            // Unreachable through the publishers: only bound names are
            // polled. Guard anyway so a bad row cannot loop a consumer.
            error!(
                job_id = job.id.unwrap_or(0),
                name = %job.name,
                "no handler bound for job name; abandoning step"
            );
            let err = anyhow!("no handler bound for job name: {}", job.name);
            let cause: &(dyn std::error::Error + Send + Sync + 'static) = err.as_ref();
            self.hooks.report(cause);
            return Ok(None);
        };

        debug!(
            job_id = job.id.unwrap_or(0),
            name = %job.name,
            status = %job.status,
            attempt = job.attempt,
            "executing job step"
        );

        let next = match handler(job.status.clone(), job.params.clone()).await {
            Ok(Step::Advance { status, params }) => job.beget(status, params),
            Ok(Step::Done) => job.beget(STATUS_DONE, Params::Null),
            Err(err) => {
                warn!(
                    job_id = job.id.unwrap_or(0),
                    name = %job.name,
                    status = %job.status,
                    attempt = job.attempt,
                    error = %err,
                    "handler failed"
                );
                let cause: &(dyn std::error::Error + Send + Sync + 'static) = err.as_ref();
                self.hooks.report(cause);
                job.retry()
            }
        };
        self.persist(next).await
    }

    /// Insert a continuation, treating a uniqueness conflict as a benign
    /// lost race against another worker.
    async fn persist(&self, job: Job) -> Result<Option<Job>, StoreError> {
        match self.store.insert_job(&job).await {
            Ok(id) => Ok(Some(job.with_id(id))),
            Err(StoreError::Duplicate) => {
                debug!(
                    parent_id = job.parent_id,
                    scheduled_job_id = job.scheduled_job_id,
                    name = %job.name,
                    "continuation already persisted elsewhere; dropping"
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerMap;
    use crate::job::{ScheduledJob, MAX_RETRIES, STATUS_FAILED};
    use crate::memory::MemoryJobStore;
    use anyhow::anyhow;
    use chrono::Utc;
    use serde_json::json;

    fn executor(store: Arc<MemoryJobStore>, handlers: HandlerMap) -> Executor {
        Executor::new(store, Arc::new(handlers), Hooks::default())
    }

    fn scheduled(id: u64) -> ScheduledJob {
        ScheduledJob {
            id,
            name: "work".into(),
            status: "start".into(),
            params: json!({"k": true}),
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn scheduled_job_persists_root() {
        let store = Arc::new(MemoryJobStore::new());
        let exec = executor(store.clone(), HandlerMap::new());

        let root = exec
            .execute(Task::Scheduled(scheduled(5)))
            .await
            .unwrap()
            .expect("root persisted");

        assert_eq!(root.scheduled_job_id, 5);
        assert_eq!(root.parent_id, 0);
        assert_eq!(root.attempt, 1);
        assert!(root.id.is_some());
        assert_eq!(store.jobs().len(), 1);
    }

    #[tokio::test]
    async fn handler_advance_persists_continuation() {
        let store = Arc::new(MemoryJobStore::new());
        let handlers = HandlerMap::new().bind("work", |_, params| async move {
            Ok(Step::advance("second", params))
        });
        let exec = executor(store.clone(), handlers);

        let root = exec
            .execute(Task::Scheduled(scheduled(1)))
            .await
            .unwrap()
            .unwrap();
        let next = exec.execute(Task::Job(root.clone())).await.unwrap().unwrap();

        assert_eq!(next.status, "second");
        assert_eq!(next.attempt, 1);
        assert_eq!(next.parent_id, root.id.unwrap());
    }

    #[tokio::test]
    async fn handler_error_persists_retry() {
        let store = Arc::new(MemoryJobStore::new());
        let handlers =
            HandlerMap::new().bind("work", |_, _| async { Err(anyhow!("boom")) });
        let exec = executor(store.clone(), handlers);

        let root = exec
            .execute(Task::Scheduled(scheduled(1)))
            .await
            .unwrap()
            .unwrap();
        let retry = exec.execute(Task::Job(root.clone())).await.unwrap().unwrap();

        assert_eq!(retry.status, "start");
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.parent_id, root.id.unwrap());
    }

    #[tokio::test]
    async fn handler_error_past_budget_fails_chain() {
        let store = Arc::new(MemoryJobStore::new());
        let handlers =
            HandlerMap::new().bind("work", |_, _| async { Err(anyhow!("boom")) });
        let exec = executor(store.clone(), handlers);

        let exhausted = Job {
            id: Some(77),
            scheduled_job_id: 1,
            parent_id: 90,
            name: "work".into(),
            status: "start".into(),
            params: json!(null),
            attempt: MAX_RETRIES,
        };

        let failed = exec.execute(Task::Job(exhausted)).await.unwrap().unwrap();
        assert_eq!(failed.status, STATUS_FAILED);
        assert_eq!(failed.parent_id, 77);
    }

    #[tokio::test]
    async fn terminal_job_deletes_scheduled_row_and_ends_chain() {
        let store = Arc::new(MemoryJobStore::new());
        let exec = executor(store.clone(), HandlerMap::new());

        let sid = store
            .insert_scheduled_job("work", "start", &json!(null), Utc::now())
            .await
            .unwrap();
        let done = Job {
            id: Some(9),
            scheduled_job_id: sid,
            parent_id: 4,
            name: "work".into(),
            status: STATUS_DONE.into(),
            params: json!(null),
            attempt: 1,
        };

        let result = exec.execute(Task::Job(done)).await.unwrap();
        assert!(result.is_none());
        assert!(store.scheduled().is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_is_benign() {
        let store = Arc::new(MemoryJobStore::new());
        let exec = executor(store.clone(), HandlerMap::new());

        // First root wins, second collides on (scheduled_job_id, parent_id).
        let first = exec.execute(Task::Scheduled(scheduled(3))).await.unwrap();
        let second = exec.execute(Task::Scheduled(scheduled(3))).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.jobs().len(), 1);
    }

    #[tokio::test]
    async fn unbound_handler_name_is_reported_and_abandoned() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = Arc::new(MemoryJobStore::new());
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = reported.clone();
        let exec = Executor::new(
            store.clone(),
            Arc::new(HandlerMap::new()),
            Hooks {
                on_error: Some(Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            },
        );

        let orphan = Job {
            id: Some(12),
            scheduled_job_id: 2,
            parent_id: 0,
            name: "unbound".into(),
            status: "start".into(),
            params: json!(null),
            attempt: 1,
        };
        let result = exec.execute(Task::Job(orphan)).await.unwrap();

        assert!(result.is_none());
        assert!(store.jobs().is_empty());
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stuck_job_begets_recovery_continuation() {
        let store = Arc::new(MemoryJobStore::new());
        let exec = executor(store.clone(), HandlerMap::new());

        let stuck = Job {
            id: Some(31),
            scheduled_job_id: 8,
            parent_id: 0,
            name: "work".into(),
            status: "start".into(),
            params: json!({"k": 1}),
            attempt: 1,
        };
        let recovered = exec.execute(Task::Stuck(stuck)).await.unwrap().unwrap();

        assert_eq!(recovered.parent_id, 31);
        assert_eq!(recovered.scheduled_job_id, 8);
        assert_eq!(recovered.status, "start");
        assert_eq!(recovered.attempt, 2);
    }
}
