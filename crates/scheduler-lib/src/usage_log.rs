//! Periodic append-only log of node usage

use crate::monitor::{fetch_usage_sample, MetricsProvider};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

const MIB: f64 = 1024.0 * 1024.0;

/// Usage log settings; disabled without a path
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageLogConfig {
    pub path: Option<PathBuf>,
    pub interval_secs: u64,
}

impl Default for UsageLogConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("node_resource.txt")),
            interval_secs: 30,
        }
    }
}

/// Appends a usage entry to a text file on every tick
pub struct UsageRecorder {
    monitor: Arc<dyn MetricsProvider>,
    path: PathBuf,
    interval: Duration,
}

impl UsageRecorder {
    /// `None` when the log is disabled
    pub fn from_config(monitor: Arc<dyn MetricsProvider>, config: &UsageLogConfig) -> Option<Self> {
        let path = config.path.clone()?;
        Some(Self {
            monitor,
            path,
            interval: Duration::from_secs(config.interval_secs.max(1)),
        })
    }

    /// Sample usage and append one entry
    pub async fn record_once(&self) -> Result<()> {
        let sample = fetch_usage_sample(self.monitor.as_ref()).await?;
        let entry = format_entry(Utc::now(), &sample.cpu, &sample.memory);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(entry.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        file.flush().await?;

        debug!(path = %self.path.display(), "Recorded node usage");
        Ok(())
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Starting usage recorder"
        );
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.record_once().await {
                        warn!(error = %e, "Failed to record node usage");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down usage recorder");
                    break;
                }
            }
        }
    }
}

/// One log entry: CPU in cores, memory in MiB, nodes sorted by name
pub fn format_entry(
    time: DateTime<Utc>,
    cpu: &HashMap<String, f64>,
    memory: &HashMap<String, f64>,
) -> String {
    format!(
        "time: {}\nCPU: {}\nMem: {}\n",
        time.to_rfc3339_opts(SecondsFormat::Secs, true),
        format_map(cpu, 1000.0),
        format_map(memory, MIB),
    )
}

fn format_map(values: &HashMap<String, f64>, divisor: f64) -> String {
    let sorted: BTreeMap<&String, f64> = values.iter().map(|(k, v)| (k, v / divisor)).collect();
    let body = sorted
        .iter()
        .map(|(node, value)| format!("{node}: {value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}
