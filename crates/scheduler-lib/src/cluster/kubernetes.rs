//! Kubernetes implementation of the cluster collaborator
//!
//! Uses `kube` for API access and converts `k8s-openapi` objects into the
//! plain records of the parent module at the boundary.

use super::{
    ClusterClient, ClusterError, ContainerResources, EventType, NodeInfo, PodEvent,
    PodEventStream, PodInfo, PodPhase, ResourceQuantities,
};
use crate::models::PodRef;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams};
use kube::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Buffered watch events between the API connection and the reconciler
const WATCH_BUFFER: usize = 256;

/// Which ready nodes count as cloud nodes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeFilter {
    /// Required value of the `role` label
    pub cloud_role: String,
    /// Optional allow-list of node names, empty accepts every name
    pub allowlist: Vec<String>,
}

impl Default for NodeFilter {
    fn default() -> Self {
        Self {
            cloud_role: "cloud".to_string(),
            allowlist: Vec::new(),
        }
    }
}

impl NodeFilter {
    fn accepts(&self, node: &Node) -> bool {
        let role_matches = node
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get("role"))
            .map(|role| role == &self.cloud_role)
            .unwrap_or(false);

        let name = node.metadata.name.as_deref().unwrap_or_default();
        role_matches && (self.allowlist.is_empty() || self.allowlist.iter().any(|n| n == name))
    }
}

/// Cluster client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    filter: NodeFilter,
}

impl KubeCluster {
    pub fn new(client: Client, filter: NodeFilter) -> Self {
        Self { client, filter }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_ready_nodes(&self, cloud_only: bool) -> Result<Vec<NodeInfo>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        let ready: Vec<NodeInfo> = nodes
            .items
            .iter()
            .filter(|node| is_ready(node))
            .filter(|node| !cloud_only || self.filter.accepts(node))
            .map(node_info)
            .collect();

        debug!(total = nodes.items.len(), ready = ready.len(), cloud_only, "Listed nodes");
        Ok(ready)
    }

    async fn list_running_pods(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(pods
            .items
            .iter()
            .map(pod_info)
            .filter(|pod| pod.phase == PodPhase::Running)
            .collect())
    }

    async fn watch_pods(&self, namespace: &str) -> Result<PodEventStream, ClusterError> {
        let api = self.pods(namespace);
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        info!(namespace = %namespace, "Opening pod watch");

        tokio::spawn(async move {
            let params = WatchParams::default();
            let stream = match api.watch(&params, "0").await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(ClusterError::Watch(e.to_string()))).await;
                    return;
                }
            };
            tokio::pin!(stream);

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(WatchEvent::Added(pod)) => Ok(PodEvent::new(EventType::Added, pod_info(&pod))),
                    Ok(WatchEvent::Modified(pod)) => {
                        Ok(PodEvent::new(EventType::Modified, pod_info(&pod)))
                    }
                    Ok(WatchEvent::Deleted(pod)) => {
                        Ok(PodEvent::new(EventType::Deleted, pod_info(&pod)))
                    }
                    Ok(WatchEvent::Bookmark(_)) => continue,
                    Ok(WatchEvent::Error(e)) => Err(ClusterError::Watch(e.message)),
                    Err(e) => Err(ClusterError::Watch(e.to_string())),
                };

                if tx.send(event).await.is_err() {
                    debug!("Pod watch receiver dropped");
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn bind_pod(&self, pod: &PodRef, node: &str) -> Result<(), ClusterError> {
        let binding = Binding {
            metadata: ObjectMeta {
                name: Some(pod.name.clone()),
                namespace: Some(pod.namespace.clone()),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node.to_string()),
                ..Default::default()
            },
        };

        let rejected = |reason: String| ClusterError::BindRejected {
            pod: pod.clone(),
            node: node.to_string(),
            reason,
        };

        let data = serde_json::to_vec(&binding).map_err(|e| rejected(e.to_string()))?;
        self.pods(&pod.namespace)
            .create_subresource::<serde_json::Value>(
                "binding",
                &pod.name,
                &PostParams::default(),
                data,
            )
            .await
            .map_err(|e| rejected(e.to_string()))?;

        Ok(())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<(), ClusterError> {
        self.pods(&pod.namespace)
            .delete(&pod.name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::DeleteFailed {
                pod: pod.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

fn is_ready(node: &Node) -> bool {
    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false);
    if unschedulable {
        return false;
    }

    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn quantity(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).map(|q| q.0.clone())
}

fn node_info(node: &Node) -> NodeInfo {
    let status = node.status.as_ref();
    let capacity = status.and_then(|s| s.capacity.as_ref());
    let allocatable = status.and_then(|s| s.allocatable.as_ref());

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        address: status
            .and_then(|s| s.addresses.as_ref())
            .and_then(|addresses| addresses.first())
            .map(|a| a.address.clone()),
        capacity_cpu: quantity(capacity, "cpu").unwrap_or_default(),
        capacity_memory: quantity(capacity, "memory").unwrap_or_default(),
        allocatable_cpu: quantity(allocatable, "cpu"),
        allocatable_memory: quantity(allocatable, "memory"),
    }
}

fn resource_quantities(map: Option<&BTreeMap<String, Quantity>>) -> ResourceQuantities {
    ResourceQuantities {
        cpu: quantity(map, "cpu"),
        memory: quantity(map, "memory"),
    }
}

fn container_resources(resources: Option<&ResourceRequirements>) -> ContainerResources {
    ContainerResources {
        requests: resource_quantities(resources.and_then(|r| r.requests.as_ref())),
        limits: resource_quantities(resources.and_then(|r| r.limits.as_ref())),
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();

    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        scheduler_name: spec
            .and_then(|s| s.scheduler_name.clone())
            .unwrap_or_default(),
        phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
        reason: status.and_then(|s| s.reason.clone()),
        node_name: spec.and_then(|s| s.node_name.clone()),
        containers: spec
            .map(|s| {
                s.containers
                    .iter()
                    .map(|c| container_resources(c.resources.as_ref()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}
