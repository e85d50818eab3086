//! Consumers: the pool of loops draining the fan-out and executing jobs.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Hooks;
use crate::executor::Executor;
use crate::job::Task;
use crate::pipeline::SharedReceiver;
use crate::sieve::{Sieve, SieveKey};

/// Serially drain the shared stream, executing each task's whole chain.
///
/// A continuation returned by the executor is fed straight back in, keeping
/// a job's chain on one consumer instead of churning it through the dedup
/// stage. The previous stream item's sieve key is released only once the
/// next item is accepted, so the key stays held for the full execution.
///
/// Errors never escape: a failed step is logged and reported, the chain is
/// abandoned to stuck-job recovery, and the loop moves on.
pub(crate) async fn run_consumer(
    index: usize,
    stream: SharedReceiver,
    executor: Arc<Executor>,
    sieve: Arc<Sieve>,
    hooks: Hooks,
) {
    info!(consumer = index, "consumer started");
    let mut last_key: Option<SieveKey> = None;
    loop {
        let task = { stream.lock().await.recv().await };
        let Some(task) = task else { break };

        if let Some(prev) = last_key.take() {
            sieve.remove(&prev);
        }
        last_key = Some(task.sieve_key());
        debug!(consumer = index, name = task.name(), "accepted task");

        let mut current = task;
        loop {
            match executor.execute(current).await {
                Ok(Some(next)) => current = Task::Job(next),
                Ok(None) => break,
                Err(err) => {
                    error!(consumer = index, error = %err, "job step failed; abandoning chain");
                    hooks.report(&err);
                    break;
                }
            }
        }
    }
    info!(consumer = index, "consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Hooks;
    use crate::handler::{HandlerMap, Step};
    use crate::job::{ScheduledJob, TaskKind};
    use crate::memory::MemoryJobStore;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::{mpsc, Mutex};

    #[tokio::test]
    async fn consumer_runs_a_chain_to_completion_and_defers_key_release() {
        let store = Arc::new(MemoryJobStore::new());
        let handlers = HandlerMap::new().bind("chain", |status, _| async move {
            match status.as_str() {
                "start" => Ok(Step::advance("finish", json!(null))),
                _ => Ok(Step::done()),
            }
        });
        let executor = Arc::new(Executor::new(
            store.clone(),
            Arc::new(handlers),
            Hooks::default(),
        ));
        let sieve = Arc::new(Sieve::new());
        let (tx, rx) = mpsc::channel(4);
        let stream: SharedReceiver = Arc::new(Mutex::new(rx));

        let scheduled = ScheduledJob {
            id: 1,
            name: "chain".into(),
            status: "start".into(),
            params: json!(null),
            scheduled_for: Utc::now(),
        };
        sieve.insert((TaskKind::Scheduled, 1));
        tx.send(Task::Scheduled(scheduled)).await.unwrap();
        drop(tx);

        run_consumer(0, stream, executor, sieve.clone(), Hooks::default()).await;

        // start -> finish -> done, then the terminal step ran cleanup.
        let statuses: Vec<_> = store.jobs().iter().map(|j| j.status.clone()).collect();
        assert_eq!(statuses, ["start", "finish", "done"]);
        // Removal is deferred by one step: no further item arrived, so the
        // key is still held at loop exit.
        assert_eq!(sieve.ids(TaskKind::Scheduled), vec![1]);
    }
}
