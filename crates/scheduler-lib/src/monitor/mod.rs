//! Node telemetry
//!
//! The placement engine never talks to a telemetry backend directly; it
//! consumes a [`UsageSample`] assembled through [`MetricsProvider`].

mod prometheus_http;

pub use prometheus_http::{MonitorConfig, PrometheusMonitor};

use crate::models::{ResourceKind, UsageSample};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors returned by a telemetry backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("telemetry backend unavailable: {0}")]
    Unavailable(String),
}

/// Source of current per-node resource usage
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Current usage per node name: milli-cores for CPU, bytes for memory
    async fn node_usage(&self, kind: ResourceKind) -> Result<HashMap<String, f64>, MonitorError>;
}

/// Fetch both resource kinds into one sample
pub async fn fetch_usage_sample(provider: &dyn MetricsProvider) -> Result<UsageSample, MonitorError> {
    let cpu = provider.node_usage(ResourceKind::Cpu).await?;
    let memory = provider.node_usage(ResourceKind::Memory).await?;
    Ok(UsageSample::new(cpu, memory))
}
