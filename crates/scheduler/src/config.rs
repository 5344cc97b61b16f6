//! Scheduler configuration

use anyhow::{ensure, Context, Result};
use scheduler_lib::bootstrap::SnapshotOptions;
use scheduler_lib::cluster::NodeFilter;
use scheduler_lib::monitor::MonitorConfig;
use scheduler_lib::pipeline::PipelineConfig;
use scheduler_lib::placement::PlacementConfig;
use scheduler_lib::reconciler::ReconcilerConfig;
use scheduler_lib::usage_log::UsageLogConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler configuration
///
/// Read from an optional file, then from `SCHEDULER_*` environment
/// variables with `__` between nested keys, e.g.
/// `SCHEDULER_PIPELINE__WORKERS=10`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pods must name this scheduler in `spec.schedulerName`
    pub scheduler_name: String,

    /// API server port for health/metrics
    pub api_port: u16,

    /// Kubeconfig to use instead of in-cluster or default discovery
    pub kubeconfig: Option<PathBuf>,

    /// Status report interval in seconds
    pub status_interval_secs: u64,

    pub pipeline: PipelineConfig,
    pub placement: PlacementConfig,
    pub reconciler: ReconcilerConfig,
    pub snapshot: SnapshotOptions,
    pub nodes: NodeFilter,
    pub monitor: MonitorConfig,
    pub usage_log: UsageLogConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "custom-scheduler".to_string(),
            api_port: 8080,
            kubeconfig: None,
            status_interval_secs: 30,
            pipeline: PipelineConfig::default(),
            placement: PlacementConfig::default(),
            reconciler: ReconcilerConfig::default(),
            snapshot: SnapshotOptions::default(),
            nodes: NodeFilter::default(),
            monitor: MonitorConfig::default(),
            usage_log: UsageLogConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("SCHEDULER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nodes.allowlist")
                .with_list_parse_key("monitor.instance_allowlist"),
        );

        Self::from_builder(builder).with_context(|| match path {
            Some(path) => format!("Invalid configuration in {}", path.display()),
            None => "Invalid configuration".to_string(),
        })
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.scheduler_name.is_empty(), "scheduler_name must not be empty");
        ensure!(self.pipeline.workers > 0, "pipeline.workers must be at least 1");
        ensure!(
            self.pipeline.queue_capacity > 0,
            "pipeline.queue_capacity must be at least 1"
        );
        ensure!(
            self.reconciler.eviction.max_attempts > 0,
            "reconciler.eviction.max_attempts must be at least 1"
        );
        Ok(())
    }

    /// Reconciler settings filtered on this scheduler's name
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            scheduler_name: self.scheduler_name.clone(),
            ..self.reconciler.clone()
        }
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}
