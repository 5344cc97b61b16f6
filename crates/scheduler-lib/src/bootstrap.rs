//! Startup snapshot of the cluster

use crate::cluster::ClusterClient;
use crate::models::{Node, PodRequest};
use crate::monitor::{fetch_usage_sample, MetricsProvider};
use crate::snapshot::ClusterSnapshot;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Which nodes and pods the startup snapshot covers
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotOptions {
    /// Restrict to nodes labelled as cloud nodes
    pub cloud_only: bool,
    /// Namespace whose running pods are recorded
    pub namespace: String,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            cloud_only: true,
            namespace: "k8s".to_string(),
        }
    }
}

/// Discover nodes and the pods already running on them
///
/// A malformed capacity or request aborts startup with the node or pod
/// named in the error.
pub async fn build_snapshot(
    cluster: &dyn ClusterClient,
    options: &SnapshotOptions,
) -> Result<ClusterSnapshot> {
    let infos = cluster
        .list_ready_nodes(options.cloud_only)
        .await
        .context("Failed to list ready nodes")?;

    let nodes = infos
        .iter()
        .map(|info| {
            Node::from_info(info)
                .with_context(|| format!("Invalid capacity on node {}", info.name))
        })
        .collect::<Result<Vec<_>>>()?;

    if nodes.is_empty() {
        warn!(cloud_only = options.cloud_only, "No ready nodes found");
    }

    let snapshot = ClusterSnapshot::new(nodes);

    for node in snapshot.node_names() {
        let pods = cluster
            .list_running_pods(&options.namespace, &node)
            .await
            .with_context(|| format!("Failed to list pods on node {node}"))?;

        for pod in &pods {
            let request = PodRequest::from_info(pod)
                .with_context(|| format!("Invalid resources on pod {}", pod.pod_ref()))?;
            snapshot.record_placement(request, &node);
        }
    }

    info!(
        nodes = ?snapshot.node_names(),
        pods = snapshot.pod_count(),
        "Built cluster snapshot"
    );
    Ok(snapshot)
}

/// Log the usage the scheduler starts from, if telemetry answers
pub async fn log_initial_usage(monitor: &dyn MetricsProvider) {
    match fetch_usage_sample(monitor).await {
        Ok(sample) => info!(cpu = ?sample.cpu, memory = ?sample.memory, "Initial node usage"),
        Err(e) => warn!(error = %e, "Initial node usage unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PodPhase;
    use crate::test_support::{pod_info, FakeCluster};
    use tokio_test::{assert_err, assert_ok};

    fn running(name: &str, node: &str) -> crate::cluster::PodInfo {
        let mut pod = pod_info(name, PodPhase::Running, "250m", "512Mi");
        pod.node_name = Some(node.to_string());
        pod
    }

    #[tokio::test]
    async fn test_snapshot_includes_cloud_nodes_and_running_pods() {
        let cluster = FakeCluster::new()
            .with_node("master", "8", "16Gi", true)
            .with_node("node1", "4", "8Gi", true)
            .with_node("edge1", "2", "4Gi", false)
            .with_running_pod("node1", running("web-0", "node1"))
            .with_running_pod("node1", pod_info("done", PodPhase::Succeeded, "1", "1Gi"));

        let snapshot = assert_ok!(build_snapshot(&cluster, &SnapshotOptions::default()).await);

        assert_eq!(snapshot.node_names(), vec!["master", "node1"]);
        let pods = snapshot.pods_on("node1");
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].cpu_request, 250);
        assert_eq!(pods[0].node.as_deref(), Some("node1"));
    }

    #[tokio::test]
    async fn test_all_ready_nodes_when_not_cloud_only() {
        let cluster = FakeCluster::new()
            .with_node("node1", "4", "8Gi", true)
            .with_node("edge1", "2", "4Gi", false);
        let options = SnapshotOptions {
            cloud_only: false,
            ..Default::default()
        };

        let snapshot = assert_ok!(build_snapshot(&cluster, &options).await);
        assert_eq!(snapshot.node_names(), vec!["edge1", "node1"]);
    }

    #[tokio::test]
    async fn test_malformed_node_capacity_aborts() {
        let cluster = FakeCluster::new().with_node("node1", "four", "8Gi", true);

        let err = assert_err!(build_snapshot(&cluster, &SnapshotOptions::default()).await);
        assert!(err.to_string().contains("node1"));
    }

    #[tokio::test]
    async fn test_malformed_pod_request_aborts() {
        let mut pod = running("web-0", "node1");
        pod.containers[0].requests.memory = Some("lots".to_string());
        let cluster = FakeCluster::new()
            .with_node("node1", "4", "8Gi", true)
            .with_running_pod("node1", pod);

        let err = assert_err!(build_snapshot(&cluster, &SnapshotOptions::default()).await);
        assert!(err.to_string().contains("k8s/web-0"));
    }
}
