//! In-memory view of the cluster
//!
//! Known nodes and the pods this scheduler has placed on each of them. The
//! pipeline appends on successful binds and the reconciler prunes on
//! deletions; both go through the same lock.

use crate::models::{Node, PodRef, PodRequest};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct SnapshotState {
    nodes: BTreeMap<String, Node>,
    placements: BTreeMap<String, Vec<PodRequest>>,
}

/// Shared registry of nodes and placed pods
#[derive(Debug, Default)]
pub struct ClusterSnapshot {
    state: Mutex<SnapshotState>,
}

impl ClusterSnapshot {
    pub fn new(nodes: Vec<Node>) -> Self {
        let snapshot = Self::default();
        {
            let mut state = snapshot.lock();
            for node in nodes {
                state.placements.entry(node.name.clone()).or_default();
                state.nodes.insert(node.name.clone(), node);
            }
        }
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, SnapshotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Known nodes in ascending name order
    pub fn nodes(&self) -> Vec<Node> {
        self.lock().nodes.values().cloned().collect()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Record a pod as placed on `node`, dropping any earlier placement of it
    pub fn record_placement(&self, mut request: PodRequest, node: &str) {
        request.node = Some(node.to_string());
        let mut state = self.lock();
        for pods in state.placements.values_mut() {
            pods.retain(|p| p.pod != request.pod);
        }
        state
            .placements
            .entry(node.to_string())
            .or_default()
            .push(request);
    }

    /// Remove a pod from whichever node it was placed on
    ///
    /// Returns `false` when the pod was not tracked.
    pub fn remove_pod(&self, pod: &PodRef) -> bool {
        let mut state = self.lock();
        for (node, pods) in state.placements.iter_mut() {
            if let Some(index) = pods.iter().position(|p| &p.pod == pod) {
                pods.remove(index);
                debug!(pod = %pod, node = %node, "Removed pod from snapshot");
                return true;
            }
        }
        false
    }

    /// Pods placed on a node, in placement order
    pub fn pods_on(&self, node: &str) -> Vec<PodRequest> {
        self.lock().placements.get(node).cloned().unwrap_or_default()
    }

    pub fn pod_count(&self) -> usize {
        self.lock().placements.values().map(Vec::len).sum()
    }
}
