//! Core data models for the scheduler

use crate::cluster::{NodeInfo, PodInfo};
use crate::quantity::{cpu_to_millis, memory_to_bytes, QuantityError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Namespace used when a pod carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Typed identity of a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: if namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                namespace
            },
            name: name.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A worker node and its capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: Option<String>,
    /// Total CPU in milli-cores
    pub capacity_cpu: u64,
    /// Total memory in bytes
    pub capacity_memory: u64,
    pub allocatable_cpu: Option<u64>,
    pub allocatable_memory: Option<u64>,
}

impl Node {
    pub fn new(name: impl Into<String>, capacity_cpu: u64, capacity_memory: u64) -> Self {
        Self {
            name: name.into(),
            address: None,
            capacity_cpu,
            capacity_memory,
            allocatable_cpu: None,
            allocatable_memory: None,
        }
    }

    /// Convert a node record reported by the cluster
    pub fn from_info(info: &NodeInfo) -> Result<Self, QuantityError> {
        Ok(Self {
            name: info.name.clone(),
            address: info.address.clone(),
            capacity_cpu: cpu_to_millis(&info.capacity_cpu)?,
            capacity_memory: memory_to_bytes(&info.capacity_memory)?,
            allocatable_cpu: info
                .allocatable_cpu
                .as_deref()
                .map(cpu_to_millis)
                .transpose()?,
            allocatable_memory: info
                .allocatable_memory
                .as_deref()
                .map(memory_to_bytes)
                .transpose()?,
        })
    }
}

/// Resource demand of a pod, summed over its containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRequest {
    pub pod: PodRef,
    /// Node the pod is bound to, `None` until scheduled
    pub node: Option<String>,
    pub cpu_request: u64,
    pub memory_request: u64,
    pub cpu_limit: u64,
    pub memory_limit: u64,
}

impl PodRequest {
    pub fn new(pod: PodRef, cpu_request: u64, memory_request: u64) -> Self {
        Self {
            pod,
            node: None,
            cpu_request,
            memory_request,
            cpu_limit: 0,
            memory_limit: 0,
        }
    }

    /// Convert a pod record reported by the cluster
    pub fn from_info(info: &PodInfo) -> Result<Self, QuantityError> {
        let mut request = Self::new(PodRef::new(&info.namespace, &info.name), 0, 0);
        request.node = info.node_name.clone().filter(|n| !n.is_empty());

        for container in &info.containers {
            if let Some(cpu) = &container.requests.cpu {
                add_quantity(&mut request.cpu_request, cpu, cpu_to_millis)?;
            }
            if let Some(memory) = &container.requests.memory {
                add_quantity(&mut request.memory_request, memory, memory_to_bytes)?;
            }
            if let Some(cpu) = &container.limits.cpu {
                add_quantity(&mut request.cpu_limit, cpu, cpu_to_millis)?;
            }
            if let Some(memory) = &container.limits.memory {
                add_quantity(&mut request.memory_limit, memory, memory_to_bytes)?;
            }
        }

        Ok(request)
    }
}

/// Add one container's quantity to a pod total; a total past `u64` is malformed
fn add_quantity(
    total: &mut u64,
    raw: &str,
    parse: fn(&str) -> Result<u64, QuantityError>,
) -> Result<(), QuantityError> {
    *total = total
        .checked_add(parse(raw)?)
        .ok_or_else(|| QuantityError::Malformed(raw.to_string()))?;
    Ok(())
}

/// Resource kinds the telemetry backend reports per node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "mem",
        }
    }
}

/// Point-in-time node usage, one map per resource kind
///
/// CPU values are milli-cores, memory values are bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub cpu: HashMap<String, f64>,
    pub memory: HashMap<String, f64>,
}

impl UsageSample {
    pub fn new(cpu: HashMap<String, f64>, memory: HashMap<String, f64>) -> Self {
        Self { cpu, memory }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.memory.is_empty()
    }

    /// Usage of a node for both kinds, if reported for both
    pub fn node_usage(&self, node: &str) -> Option<(f64, f64)> {
        Some((*self.cpu.get(node)?, *self.memory.get(node)?))
    }

    pub fn get(&self, kind: ResourceKind) -> &HashMap<String, f64> {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
        }
    }
}
