//! Cluster API collaborator
//!
//! The scheduler talks to the cluster only through [`ClusterClient`]. Records
//! crossing this boundary are plain data ([`NodeInfo`], [`PodInfo`]); native
//! API objects never leak into the domain model.

mod kubernetes;

pub use kubernetes::{KubeCluster, NodeFilter};

use crate::models::PodRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Errors returned by cluster operations
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API request failed: {0}")]
    Api(String),

    #[error("binding {pod} to node {node} rejected: {reason}")]
    BindRejected {
        pod: PodRef,
        node: String,
        reason: String,
    },

    #[error("deleting {pod} failed: {reason}")]
    DeleteFailed { pod: PodRef, reason: String },

    #[error("pod watch failed: {0}")]
    Watch(String),
}

/// Node as reported by the cluster, quantities still unparsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub address: Option<String>,
    pub capacity_cpu: String,
    pub capacity_memory: String,
    pub allocatable_cpu: Option<String>,
    pub allocatable_memory: Option<String>,
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// CPU and memory quantity strings of one resource list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Requests and limits of one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

/// Pod as reported by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    /// Scheduler the pod asks for in its spec
    pub scheduler_name: String,
    pub phase: PodPhase,
    /// Status reason, e.g. `OutOfcpu`
    pub reason: Option<String>,
    pub node_name: Option<String>,
    pub containers: Vec<ContainerResources>,
}

impl PodInfo {
    pub fn pod_ref(&self) -> PodRef {
        PodRef::new(&self.namespace, &self.name)
    }
}

/// Watch notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// One notification from the pod watch
#[derive(Debug, Clone, PartialEq)]
pub struct PodEvent {
    pub event_type: EventType,
    pub pod: PodInfo,
}

impl PodEvent {
    pub fn new(event_type: EventType, pod: PodInfo) -> Self {
        Self { event_type, pod }
    }
}

/// Live stream of pod events
pub type PodEventStream = Pin<Box<dyn Stream<Item = Result<PodEvent, ClusterError>> + Send>>;

/// Narrow view of the cluster API used by the scheduler
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List ready, schedulable nodes; `cloud_only` restricts to cloud nodes
    async fn list_ready_nodes(&self, cloud_only: bool) -> Result<Vec<NodeInfo>, ClusterError>;

    /// List running pods of a namespace placed on a node
    async fn list_running_pods(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Vec<PodInfo>, ClusterError>;

    /// Open a watch over pods; an empty namespace watches all namespaces
    async fn watch_pods(&self, namespace: &str) -> Result<PodEventStream, ClusterError>;

    /// Bind a pod to a node
    async fn bind_pod(&self, pod: &PodRef, node: &str) -> Result<(), ClusterError>;

    /// Delete a pod
    async fn delete_pod(&self, pod: &PodRef) -> Result<(), ClusterError>;
}
