//! Punchcard server binary.
//!
//! Serves the inbound messaging webhook, delivers outbound notifications and
//! runs the periodic sweep (reward expiry, processed message id pruning).
//!
//! Usage: `punchcard-server [config.yaml]`

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};

use punchcard::app::AppBuilder;
use punchcard::config::Config;
use punchcard::storage::init_storage;
use punchcard::utils::bootstrap::{init_tracing, shutdown_signal};
use punchcard::utils::retry::connection_backoff;
use punchcard::webhook;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        storage = ?config.storage.storage_type,
        approvers = config.approvers.len(),
        "Starting punchcard server"
    );

    let storage_config = config.storage.clone();
    let stores = (|| {
        let storage_config = storage_config.clone();
        async move {
            init_storage(&storage_config)
                .await
                .map_err(|e| e.to_string())
        }
    })
    .retry(connection_backoff())
    .notify(|err: &String, dur: Duration| {
        warn!(error = %err, retry_in = ?dur, "Storage not ready, retrying");
    })
    .await?;

    let app = Arc::new(AppBuilder::new(config.clone()).with_stores(stores).build());
    let sweep = app.clone().spawn_sweep();

    let routes = webhook::router(app.router.clone(), &config.webhook);
    webhook::serve(routes, &config.server.bind_address(), shutdown_signal()).await?;

    if let Some(sweep) = sweep {
        sweep.abort();
    }
    let stats = app.dispatcher.stats();
    info!(
        enqueued = stats.enqueued,
        delivered = stats.delivered,
        failed = stats.failed,
        dropped = stats.dropped,
        "Punchcard server stopped"
    );
    Ok(())
}
