//! The deduplicating fan-out between publishers and consumers.
//!
//! One bounded input channel feeds a forwarder task that drops tasks whose
//! sieve key is already in flight and pushes the rest onto a bounded
//! intermediate channel shared by every consumer. Closing the input cascades
//! shutdown through the whole pipeline: the forwarder exits, the
//! intermediate sender drops, and consumers drain whatever is buffered.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::job::Task;
use crate::sieve::Sieve;

/// Receiver end shared by the consumer pool.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Task>>>;

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Publish {
    /// Number of tasks pushed into the pipeline this cycle.
    Sent(usize),
    /// Nothing was pushed and the pipeline no longer accepts input.
    Closed,
}

/// Push tasks onto the input one at a time, stopping at the first refusal.
///
/// A refusal is a closed channel or shutdown cancellation mid-send. Partial
/// progress still counts as a productive cycle; only a refusal with nothing
/// sent reports the pipeline as closed.
pub(crate) async fn batch_publish(
    input: &mpsc::Sender<Task>,
    tasks: Vec<Task>,
    shutdown: &CancellationToken,
) -> Publish {
    let mut sent = 0;
    for task in tasks {
        tokio::select! {
            _ = shutdown.cancelled() => {
                return if sent > 0 { Publish::Sent(sent) } else { Publish::Closed };
            }
            result = input.send(task) => match result {
                Ok(()) => sent += 1,
                Err(_) => return if sent > 0 { Publish::Sent(sent) } else { Publish::Closed },
            },
        }
    }
    Publish::Sent(sent)
}

/// Forward input tasks to the intermediate channel, suppressing duplicates.
///
/// The sieve key is inserted here and removed by the consumer one step after
/// it finishes with the task, so a duplicate cannot slip through between
/// executor start and completion.
pub(crate) async fn run_forwarder(
    mut input: mpsc::Receiver<Task>,
    output: mpsc::Sender<Task>,
    sieve: Arc<Sieve>,
) {
    while let Some(task) = input.recv().await {
        let key = task.sieve_key();
        if !sieve.insert(key) {
            trace!(name = task.name(), key = ?key, "dropping in-flight duplicate");
            continue;
        }
        if output.send(task).await.is_err() {
            break;
        }
    }
    trace!("forwarder input closed; shutting down fan-out");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ScheduledJob;
    use chrono::Utc;
    use serde_json::json;

    fn scheduled_task(id: u64) -> Task {
        Task::Scheduled(ScheduledJob {
            id,
            name: "t".into(),
            status: "start".into(),
            params: json!(null),
            scheduled_for: Utc::now(),
        })
    }

    #[tokio::test]
    async fn forwarder_suppresses_in_flight_duplicates() {
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let sieve = Arc::new(Sieve::new());
        let forwarder = tokio::spawn(run_forwarder(in_rx, out_tx, sieve.clone()));

        in_tx.send(scheduled_task(1)).await.unwrap();
        in_tx.send(scheduled_task(1)).await.unwrap();
        in_tx.send(scheduled_task(2)).await.unwrap();
        drop(in_tx);

        let mut ids = Vec::new();
        while let Some(Task::Scheduled(s)) = out_rx.recv().await {
            ids.push(s.id);
        }
        assert_eq!(ids, vec![1, 2]);
        forwarder.await.unwrap();
    }

    #[tokio::test]
    async fn batch_publish_reports_progress_then_closure() {
        let (tx, mut rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let outcome =
            batch_publish(&tx, vec![scheduled_task(1), scheduled_task(2)], &shutdown).await;
        assert_eq!(outcome, Publish::Sent(2));

        rx.close();
        let outcome = batch_publish(&tx, vec![scheduled_task(3)], &shutdown).await;
        assert_eq!(outcome, Publish::Closed);

        let outcome = batch_publish(&tx, Vec::new(), &shutdown).await;
        assert_eq!(outcome, Publish::Sent(0));
    }

    #[tokio::test]
    async fn batch_publish_yields_to_shutdown() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        // Fill the only slot, then cancel: the blocked send must give up.
        tx.send(scheduled_task(1)).await.unwrap();
        shutdown.cancel();
        let outcome = batch_publish(&tx, vec![scheduled_task(2)], &shutdown).await;
        assert_eq!(outcome, Publish::Closed);
    }
}
