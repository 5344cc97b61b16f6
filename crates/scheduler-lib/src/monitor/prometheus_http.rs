//! Prometheus instant-query adapter

use super::{MetricsProvider, MonitorError};
use crate::models::ResourceKind;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Node CPU in use, milli-cores, from node-exporter idle counters
pub const DEFAULT_CPU_QUERY: &str = "(1 - avg by (instance) (rate(node_cpu_seconds_total{mode=\"idle\", job=\"node-exporter\"}[2m]))) * (count(count(node_cpu_seconds_total{job=\"node-exporter\"}) by (cpu, instance)) by (instance)) * 1000";

/// Node memory in use, bytes
pub const DEFAULT_MEMORY_QUERY: &str =
    "node_memory_MemTotal_bytes{job=\"node-exporter\"} - node_memory_MemAvailable_bytes{job=\"node-exporter\"}";

/// Configuration for the Prometheus adapter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base URL of the Prometheus server
    pub endpoint: String,
    pub cpu_query: String,
    pub memory_query: String,
    pub timeout_secs: u64,
    /// Node names to keep, empty keeps every instance
    pub instance_allowlist: Vec<String>,
    /// Exporter address to node name, for instances reported as `ip:port`
    pub node_addresses: HashMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://prometheus-k8s.monitoring:9090".to_string(),
            cpu_query: DEFAULT_CPU_QUERY.to_string(),
            memory_query: DEFAULT_MEMORY_QUERY.to_string(),
            timeout_secs: 10,
            instance_allowlist: Vec::new(),
            node_addresses: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[timestamp, "value"]`
    value: (f64, String),
}

/// Metrics provider backed by the Prometheus HTTP API
pub struct PrometheusMonitor {
    client: reqwest::Client,
    query_url: Url,
    config: MonitorConfig,
}

impl PrometheusMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let mut base = config.endpoint.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let query_url = Url::parse(&base)
            .and_then(|url| url.join("api/v1/query"))
            .map_err(|e| {
                MonitorError::Unavailable(format!("invalid endpoint '{}': {e}", config.endpoint))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MonitorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            query_url,
            config,
        })
    }

    /// Map an exporter `instance` label to a node name
    fn resolve_instance(&self, instance: &str) -> String {
        if let Some(name) = self.config.node_addresses.get(instance) {
            return name.clone();
        }
        let host = instance
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(instance);
        self.config
            .node_addresses
            .get(host)
            .cloned()
            .unwrap_or_else(|| host.to_string())
    }

    async fn query(&self, promql: &str) -> Result<HashMap<String, f64>, MonitorError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut().append_pair("query", promql);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Unavailable(format!(
                "query returned HTTP {status}"
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::Unavailable(format!("malformed query response: {e}")))?;

        if body.status != "success" {
            return Err(MonitorError::Unavailable(format!(
                "query status '{}': {}",
                body.status,
                body.error.unwrap_or_default()
            )));
        }

        let mut usage = HashMap::new();
        for result in body.data.map(|d| d.result).unwrap_or_default() {
            let Some(instance) = result.metric.get("instance") else {
                continue;
            };
            let node = self.resolve_instance(instance);
            if !self.config.instance_allowlist.is_empty()
                && !self.config.instance_allowlist.contains(&node)
            {
                continue;
            }

            let value = result
                .value
                .1
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    MonitorError::Unavailable(format!(
                        "malformed value '{}' for instance {instance}",
                        result.value.1
                    ))
                })?;
            usage.insert(node, value);
        }

        Ok(usage)
    }
}

#[async_trait]
impl MetricsProvider for PrometheusMonitor {
    async fn node_usage(&self, kind: ResourceKind) -> Result<HashMap<String, f64>, MonitorError> {
        let promql = match kind {
            ResourceKind::Cpu => &self.config.cpu_query,
            ResourceKind::Memory => &self.config.memory_query,
        };
        let usage = self.query(promql).await?;
        debug!(kind = kind.as_str(), nodes = usage.len(), "Fetched node usage");
        Ok(usage)
    }
}
