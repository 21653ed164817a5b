//! wallet_pipeline runner
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────┐    ┌────────────┐
//! │  Config  │───▶│   Ledger   │───▶│ Pipeline │───▶│   Notify   │
//! │  (YAML)  │    │ (Pg / Mem) │    │ (workers)│    │ (intents)  │
//! └──────────┘    └────────────┘    └──────────┘    └────────────┘
//! ```
//!
//! Loads `config/<env>.yaml`, opens the ledger store (PostgreSQL when a
//! URL is configured, in-memory otherwise), starts the worker pool and
//! logs notification intents until Ctrl-C.

use std::sync::Arc;

use tracing::{error, info};

use wallet_pipeline::config::AppConfig;
use wallet_pipeline::ledger::{LedgerStore, MemoryLedger, PgLedger};
use wallet_pipeline::logging::init_logging;
use wallet_pipeline::pipeline::Pipeline;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _guard = init_logging(&config);

    info!(env, workers = config.pipeline.workers, "Starting wallet pipeline");

    let store: Arc<dyn LedgerStore> = match &config.postgres_url {
        Some(url) => {
            let pg = PgLedger::connect(url).await?;
            info!("Ledger store: PostgreSQL");
            Arc::new(pg)
        }
        None => {
            info!("Ledger store: in-memory (no postgres_url configured)");
            Arc::new(MemoryLedger::new())
        }
    };

    let (pipeline, mut notifications) = Pipeline::start(store, &config.pipeline);

    // Delivery collaborator stand-in: log every intent.
    let notify_task = tokio::spawn(async move {
        while let Some(intent) = notifications.recv().await {
            info!(
                user_id = intent.user_id,
                transaction_id = %intent.transaction_id,
                event = ?intent.event,
                "Notification intent"
            );
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
    pipeline.shutdown();
    notify_task.abort();
    Ok(())
}
