//! In-memory collaborators for unit tests

use crate::cluster::{
    ClusterClient, ClusterError, ContainerResources, EventType, NodeInfo, PodEvent,
    PodEventStream, PodInfo, PodPhase, ResourceQuantities,
};
use crate::models::{PodRef, ResourceKind, UsageSample};
use crate::monitor::{MetricsProvider, MonitorError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Metrics provider returning a fixed sample
pub struct StaticMonitor {
    sample: Mutex<Option<UsageSample>>,
    calls: AtomicUsize,
}

impl StaticMonitor {
    pub fn new(sample: UsageSample) -> Self {
        Self {
            sample: Mutex::new(Some(sample)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            sample: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, sample: Option<UsageSample>) {
        *self.sample.lock().unwrap() = sample;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsProvider for StaticMonitor {
    async fn node_usage(&self, kind: ResourceKind) -> Result<HashMap<String, f64>, MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.get(kind).clone())
            .ok_or_else(|| MonitorError::Unavailable("connection refused".to_string()))
    }
}

/// Cluster client recording binds and deletes
#[derive(Default)]
pub struct FakeCluster {
    pub nodes: Vec<NodeInfo>,
    pub cloud_nodes: HashSet<String>,
    pub running: HashMap<String, Vec<PodInfo>>,
    binds: Mutex<Vec<(PodRef, String)>>,
    rejected_binds: Mutex<HashSet<String>>,
    deletes: Mutex<Vec<PodRef>>,
    delete_failures: AtomicU32,
    watches: Mutex<VecDeque<Vec<Result<PodEvent, ClusterError>>>>,
    watch_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, name: &str, cpu: &str, memory: &str, cloud: bool) -> Self {
        self.nodes.push(NodeInfo {
            name: name.to_string(),
            address: None,
            capacity_cpu: cpu.to_string(),
            capacity_memory: memory.to_string(),
            allocatable_cpu: None,
            allocatable_memory: None,
        });
        if cloud {
            self.cloud_nodes.insert(name.to_string());
        }
        self
    }

    pub fn with_running_pod(mut self, node: &str, pod: PodInfo) -> Self {
        self.running.entry(node.to_string()).or_default().push(pod);
        self
    }

    /// Queue the events delivered by the next watch
    pub fn push_watch(&self, events: Vec<Result<PodEvent, ClusterError>>) {
        self.watches.lock().unwrap().push_back(events);
    }

    /// Reject binds of the named pod
    pub fn reject_bind(&self, pod_name: &str) {
        self.rejected_binds
            .lock()
            .unwrap()
            .insert(pod_name.to_string());
    }

    /// Fail the next `count` deletes
    pub fn fail_deletes(&self, count: u32) {
        self.delete_failures.store(count, Ordering::SeqCst);
    }

    pub fn binds(&self) -> Vec<(PodRef, String)> {
        self.binds.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<PodRef> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_ready_nodes(&self, cloud_only: bool) -> Result<Vec<NodeInfo>, ClusterError> {
        Ok(self
            .nodes
            .iter()
            .filter(|n| !cloud_only || self.cloud_nodes.contains(&n.name))
            .cloned()
            .collect())
    }

    async fn list_running_pods(
        &self,
        namespace: &str,
        node: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        Ok(self
            .running
            .get(node)
            .map(|pods| {
                pods.iter()
                    .filter(|p| p.namespace == namespace && p.phase == PodPhase::Running)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn watch_pods(&self, _namespace: &str) -> Result<PodEventStream, ClusterError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        match self.watches.lock().unwrap().pop_front() {
            Some(events) => Ok(Box::pin(tokio_stream::iter(events))),
            None => Ok(Box::pin(tokio_stream::pending())),
        }
    }

    async fn bind_pod(&self, pod: &PodRef, node: &str) -> Result<(), ClusterError> {
        if self.rejected_binds.lock().unwrap().contains(&pod.name) {
            return Err(ClusterError::BindRejected {
                pod: pod.clone(),
                node: node.to_string(),
                reason: "pods \"web\" is forbidden".to_string(),
            });
        }
        self.binds
            .lock()
            .unwrap()
            .push((pod.clone(), node.to_string()));
        Ok(())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<(), ClusterError> {
        let remaining = self.delete_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.delete_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ClusterError::DeleteFailed {
                pod: pod.clone(),
                reason: "etcdserver: request timed out".to_string(),
            });
        }
        self.deletes.lock().unwrap().push(pod.clone());
        Ok(())
    }
}

/// Pod record with one container requesting `cpu` and `memory`
pub fn pod_info(name: &str, phase: PodPhase, cpu: &str, memory: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: "k8s".to_string(),
        scheduler_name: "custom-scheduler".to_string(),
        phase,
        reason: None,
        node_name: None,
        containers: vec![ContainerResources {
            requests: ResourceQuantities {
                cpu: Some(cpu.to_string()),
                memory: Some(memory.to_string()),
            },
            limits: ResourceQuantities::default(),
        }],
    }
}

pub fn event(event_type: EventType, pod: PodInfo) -> Result<PodEvent, ClusterError> {
    Ok(PodEvent::new(event_type, pod))
}
