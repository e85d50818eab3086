//! # Greeter Demo
//!
//! Schedules a two-step job and runs a worker until the chain completes.
//!
//! ```sh
//! DATABASE_URL=mysql://root@localhost/silo_demo cargo run -p greeter
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use silo::{HandlerMap, Step, Worker, WorkerConfig};
use silo_mysql::MySqlJobStore;
use sqlx::MySqlPool;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,silo=debug".into()),
        )
        .init();

    let url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "mysql://root@localhost/silo_demo".into());
    let pool = MySqlPool::connect(&url).await?;
    let store = Arc::new(MySqlJobStore::new(pool));

    silo::initialize(store.as_ref()).await?;

    let handlers = HandlerMap::new().bind("greet", |status, params| async move {
        match status.as_str() {
            "start" => {
                println!("hello, {}!", params["name"].as_str().unwrap_or("stranger"));
                Ok(Step::advance("wave", params))
            }
            _ => {
                println!("goodbye!");
                Ok(Step::done())
            }
        }
    });

    let id = silo::schedule(
        store.as_ref(),
        "greet",
        "start",
        json!({"name": "world"}),
        Utc::now(),
    )
    .await?;
    info!(scheduled_job_id = id, "scheduled greeting");

    let worker = Worker::start(store.clone(), handlers, WorkerConfig::default());

    // Give the chain time to run, then report and shut down.
    tokio::time::sleep(Duration::from_secs(3)).await;
    let stats = store.stats().await?;
    info!(?stats, "queue state before shutdown");

    let drained = worker.stop(Duration::from_secs(10)).await;
    info!(drained, "worker stopped");
    Ok(())
}
