use etcd_keeper::cloud::{Ec2Inventory, ImdsClient};
use etcd_keeper::config::KeeperConfig;
use etcd_keeper::etcd::HttpEtcdApi;
use etcd_keeper::keeper::run_keeper;
use etcd_keeper::manager::{Manager, ProcessLauncher};
use etcd_keeper::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting etcd keeper");

    let config = KeeperConfig::from_env();
    info!(
        etcd_binary = %config.etcd_binary.display(),
        data_dir = %config.data_dir.display(),
        retry_delay = ?config.retry_delay,
        housekeeper_interval = ?config.housekeeper_interval,
        "Configuration loaded"
    );

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = create_metrics()?;

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(health_port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    let signal_handle = tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal = signal, "Initiating graceful shutdown");
        shutdown_controller.shutdown();
    });

    let housekeeper_interval = config.housekeeper_interval;
    let manager = Manager::new(
        config.clone(),
        Arc::new(ImdsClient::new(config.metadata_url.clone(), config.api_timeout)),
        Arc::new(Ec2Inventory::new()),
        Arc::new(HttpEtcdApi::new(config.api_timeout)),
        Arc::new(ProcessLauncher),
    )
    .with_readiness(readiness)
    .with_metrics(metrics);

    run_keeper(Arc::new(manager), housekeeper_interval, shutdown_signal).await;

    signal_handle.abort();
    health_handle.abort();

    info!("etcd keeper shut down");
    Ok(())
}
