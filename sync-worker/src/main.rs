use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use queue_broker::{AwsBroker, Broker};
use sync_worker::config::WorkerConfig;
use sync_worker::consumer::{LoggingHandler, PollingConsumer};
use sync_worker::health;
use sync_worker::setup;
use sync_worker::types::Environment;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env = Environment::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting sync worker in {} environment", env);

    let config = WorkerConfig::from_environment(&env).context("Invalid configuration")?;
    let broker: Arc<dyn Broker> = Arc::new(AwsBroker::from_conf(&config.sdk_config().await));

    let pipeline = setup::provision(
        Arc::clone(&broker),
        &config.queue_name,
        &config.queue_attributes,
        &config.topic,
    )
    .await
    .context("Setup failed, refusing to start polling")?;
    info!(
        queue = %pipeline.queue.locator(),
        subscription = %pipeline.subscription,
        "✅ Sync pipeline ready"
    );

    let shutdown_token = CancellationToken::new();
    let consumer = PollingConsumer::new(
        broker,
        Arc::new(LoggingHandler),
        pipeline.queue.locator().clone(),
        config.poll,
        shutdown_token.clone(),
    );

    // Start health check server
    let health_status = consumer.status();
    let health_shutdown = shutdown_token.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) =
            health::start_health_server(health_port, health_status, health_shutdown).await
        {
            error!("Health server error: {}", e);
        }
    });

    // Spawn signal handler
    let signal_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, finishing current work...");
        signal_shutdown.cancel();
    });

    consumer.run().await;

    info!("Sync worker stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
