//! Balance Scheduler - resource-aware pod placement controller
//!
//! Watches pods that name this scheduler, places each one on the node that
//! keeps CPU and memory utilisation balanced according to live telemetry,
//! and evicts pods the kubelet rejected for lack of resources.

use anyhow::{Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use scheduler_lib::{
    bootstrap,
    cluster::{ClusterClient, KubeCluster},
    health::{Component, HealthRegistry},
    monitor::{MetricsProvider, PrometheusMonitor},
    observability::{SchedulerMetrics, StructuredLogger},
    pipeline::{AdmissionPipeline, Dispatcher},
    placement::PlacementEngine,
    reconciler::Reconciler,
    status::StatusReporter,
    usage_log::UsageRecorder,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SCHEDULER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "balance-scheduler", version, about)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "SCHEDULER_CONFIG")]
    config: Option<PathBuf>,
}

async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(config)?)
        }
        None => Client::try_default()
            .await
            .context("Failed to infer cluster configuration"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let config = config::SchedulerConfig::load(args.config.as_deref())?;
    info!(
        scheduler = %config.scheduler_name,
        policy = ?config.placement.policy,
        workers = config.pipeline.workers,
        "Scheduler configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = Arc::new(SchedulerMetrics::new().context("Failed to register metrics")?);
    let logger = StructuredLogger::new(&config.scheduler_name);

    // API comes up first so health checks answer during startup
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let client = kube_client(config.kubeconfig.as_deref()).await?;
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(KubeCluster::new(client, config.nodes.clone()));
    let monitor: Arc<dyn MetricsProvider> = Arc::new(
        PrometheusMonitor::new(config.monitor.clone())
            .context("Failed to configure telemetry client")?,
    );

    let snapshot = match bootstrap::build_snapshot(cluster.as_ref(), &config.snapshot).await {
        Ok(snapshot) => Arc::new(snapshot),
        Err(e) => {
            health_registry
                .set_unhealthy(Component::Cluster, format!("{e:#}"))
                .await;
            return Err(e);
        }
    };
    bootstrap::log_initial_usage(monitor.as_ref()).await;

    let engine = Arc::new(PlacementEngine::new(config.placement.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        cluster.clone(),
        monitor.clone(),
        engine,
        snapshot.clone(),
        metrics.clone(),
        logger.clone(),
        health_registry.clone(),
    ));
    let pipeline = Arc::new(AdmissionPipeline::new(
        config.pipeline.clone(),
        dispatcher,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = pipeline.start(&shutdown_tx);

    let reconciler = Arc::new(Reconciler::new(
        config.reconciler_config(),
        cluster.clone(),
        pipeline.clone(),
        snapshot.clone(),
        metrics.clone(),
        logger.clone(),
        health_registry.clone(),
        shutdown_tx.clone(),
    ));
    handles.push(tokio::spawn(async move { reconciler.run().await }));

    if let Some(recorder) = UsageRecorder::from_config(monitor.clone(), &config.usage_log) {
        handles.push(tokio::spawn(recorder.run(shutdown_tx.subscribe())));
    }

    let reporter = StatusReporter::new(
        metrics.clone(),
        logger.clone(),
        config.pipeline.workers,
        config.status_interval(),
    );
    handles.push(tokio::spawn(reporter.run(shutdown_tx.subscribe())));

    health_registry.set_healthy(Component::Pipeline).await;
    health_registry.set_healthy(Component::Cluster).await;
    health_registry.set_ready(true).await;
    logger.log_startup(SCHEDULER_VERSION, &snapshot.node_names());

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    pipeline.close();
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
    api_handle.abort();

    info!(stats = ?metrics.stats(), "Shutdown complete");
    Ok(())
}
