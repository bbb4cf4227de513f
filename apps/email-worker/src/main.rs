//! Email Worker Service - Entry Point
//!
//! Background worker that delivers queued lifecycle emails. Runs exactly one
//! consumer per process and stops on ctrl-c.

use core_config::{Environment, FromEnv, redis::RedisConfig, tracing::init_tracing};
use domain_notifications::{EmailWorker, SmtpProvider, TemplateEngine, WorkerConfig};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let environment = Environment::from_env();
    init_tracing(&environment);

    let redis_config = RedisConfig::from_env()?;
    let client = redis::Client::open(redis_config.uri.as_str())?;
    let redis = client.get_connection_manager().await?;

    let provider = SmtpProvider::from_env()?;
    let templates = TemplateEngine::new()?;
    let worker = EmailWorker::new(redis, provider, templates, WorkerConfig::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await?;

    Ok(())
}
