//! Worker supervisor: wires publishers, fan-out, and consumers, and owns
//! their lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::consumer::run_consumer;
use crate::error::{ErrorHook, Hooks};
use crate::executor::Executor;
use crate::handler::HandlerMap;
use crate::pipeline::run_forwarder;
use crate::publisher::{run_publisher, RecoverySource, SchedulerSource, SourceContext};
use crate::sieve::Sieve;
use crate::store::JobStore;

/// Tuning knobs for a [`Worker`]. `..Default::default()` fills in the rest.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Capacity of the fan-out's intermediate stream.
    pub buffer_size: usize,
    /// Maximum rows fetched per publisher poll.
    pub prefetch: u32,
    /// Number of consumer loops executing jobs.
    pub consumers: usize,
    /// Floor for the scheduler publisher's backoff sleep.
    pub min_scheduler_poll: Duration,
    /// Idle cadence of the scheduler publisher.
    pub max_scheduler_poll: Duration,
    /// Floor for the recovery publisher's backoff sleep.
    pub min_recovery_poll: Duration,
    /// Idle cadence of the recovery publisher.
    pub max_recovery_poll: Duration,
    /// Age past which a non-terminal job row counts as abandoned.
    pub recovery_threshold: Duration,
    /// Optional sink for handler errors and swallowed store errors.
    pub on_error: Option<ErrorHook>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10,
            prefetch: 10,
            consumers: 2,
            min_scheduler_poll: Duration::ZERO,
            max_scheduler_poll: Duration::from_secs(10),
            min_recovery_poll: Duration::ZERO,
            max_recovery_poll: Duration::from_secs(10),
            recovery_threshold: Duration::from_secs(20 * 60),
            on_error: None,
        }
    }
}

/// A running worker: two publishers, the dedup forwarder, and a consumer
/// pool, all feeding off one store.
pub struct Worker {
    running: AtomicBool,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Spawn the pipeline and return its handle.
    ///
    /// `handlers` must bind at least one name; an empty map would poll for
    /// nothing forever.
    pub fn start(store: Arc<dyn JobStore>, handlers: HandlerMap, config: WorkerConfig) -> Worker {
        let buffer_size = config.buffer_size.max(1);
        let consumers = config.consumers.max(1);
        if handlers.is_empty() {
            warn!("starting worker with no bound handlers; publishers will never match a row");
        }

        let names = Arc::new(handlers.names());
        let handlers = Arc::new(handlers);
        let sieve = Arc::new(Sieve::new());
        let hooks = Hooks {
            on_error: config.on_error.clone(),
        };
        let shutdown = CancellationToken::new();

        let (input_tx, input_rx) = mpsc::channel(buffer_size);
        let (fanout_tx, fanout_rx) = mpsc::channel(buffer_size);
        let stream = Arc::new(tokio::sync::Mutex::new(fanout_rx));
        let executor = Arc::new(Executor::new(store.clone(), handlers, hooks.clone()));

        let mut tasks = Vec::with_capacity(consumers + 3);

        tasks.push(tokio::spawn(run_forwarder(
            input_rx,
            fanout_tx,
            sieve.clone(),
        )));

        for index in 0..consumers {
            tasks.push(tokio::spawn(run_consumer(
                index,
                stream.clone(),
                executor.clone(),
                sieve.clone(),
                hooks.clone(),
            )));
        }

        let scheduler = SchedulerSource {
            ctx: SourceContext {
                store: store.clone(),
                sieve: sieve.clone(),
                input: input_tx.clone(),
                names: names.clone(),
                prefetch: config.prefetch,
                hooks: hooks.clone(),
                shutdown: shutdown.clone(),
            },
        };
        tasks.push(tokio::spawn(run_publisher(
            scheduler,
            config.min_scheduler_poll,
            config.max_scheduler_poll,
            shutdown.clone(),
        )));

        let recovery = RecoverySource {
            ctx: SourceContext {
                store,
                sieve,
                input: input_tx,
                names,
                prefetch: config.prefetch,
                hooks,
                shutdown: shutdown.clone(),
            },
            stuck_after: config.recovery_threshold,
        };
        tasks.push(tokio::spawn(run_publisher(
            recovery,
            config.min_recovery_poll,
            config.max_recovery_poll,
            shutdown.clone(),
        )));

        info!(consumers, buffer_size, "worker started");
        Worker {
            running: AtomicBool::new(true),
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shut the pipeline down and wait up to `timeout` for every loop to
    /// drain.
    ///
    /// Cancellation stops the publishers, whose dropped senders close the
    /// pipeline input; the closure cascades through the forwarder to the
    /// consumers, which finish whatever is buffered. In-flight handlers are
    /// never interrupted — a handler that outlives `timeout` makes this
    /// return `false`, and its job is left to stuck recovery on the next
    /// start. Calling `stop` on an already-stopped worker is a no-op
    /// returning `true`.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return true;
        }
        info!("stopping worker");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap();
            guard.drain(..).collect()
        };
        let drained = tokio::time::timeout(timeout, join_all(tasks)).await.is_ok();
        if drained {
            info!("worker stopped cleanly");
        } else {
            warn!(?timeout, "worker stop timed out with loops still running");
        }
        drained
    }
}
