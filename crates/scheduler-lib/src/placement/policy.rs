//! Scoring policies for the primary placement phase

use crate::models::{Node, PodRequest};

/// A feasible node with its current usage
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub node: &'a Node,
    /// Milli-cores in use
    pub cpu_used: f64,
    /// Bytes in use
    pub memory_used: f64,
}

impl Candidate<'_> {
    pub fn cpu_left(&self) -> f64 {
        self.node.capacity_cpu as f64 - self.cpu_used
    }

    pub fn memory_left(&self) -> f64 {
        self.node.capacity_memory as f64 - self.memory_used
    }
}

/// Scores a candidate node; the highest score wins
pub trait PlacementPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, request: &PodRequest, candidate: &Candidate<'_>) -> f64;

    /// Value reported alongside the decision, never used for comparison
    fn scale(&self, score: f64, _node_count: usize) -> f64 {
        score
    }
}

/// Cooperative policy: rewards placements that keep projected CPU and memory
/// utilisation close to each other
///
/// `H = 10 - 100 * variance` over the two projected utilisation rates.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancePolicy;

impl BalancePolicy {
    /// Variance of the projected CPU and memory utilisation rates
    pub fn variance(request: &PodRequest, candidate: &Candidate<'_>) -> f64 {
        let cpu_rate =
            (candidate.cpu_used + request.cpu_request as f64) / candidate.node.capacity_cpu as f64;
        let memory_rate = (candidate.memory_used + request.memory_request as f64)
            / candidate.node.capacity_memory as f64;
        let mean = (cpu_rate + memory_rate) / 2.0;
        ((cpu_rate - mean).powi(2) + (memory_rate - mean).powi(2)) / 2.0
    }
}

impl PlacementPolicy for BalancePolicy {
    fn name(&self) -> &'static str {
        "balance"
    }

    fn score(&self, request: &PodRequest, candidate: &Candidate<'_>) -> f64 {
        10.0 - 100.0 * Self::variance(request, candidate)
    }

    /// `H * 10^(node_count - 1)`
    fn scale(&self, score: f64, node_count: usize) -> f64 {
        let exponent = i32::try_from(node_count.saturating_sub(1)).unwrap_or(i32::MAX);
        score * 10f64.powi(exponent)
    }
}

/// Non-cooperative policy: `req.cpu / cpu_left + req.mem / mem_left`
#[derive(Debug, Clone, Copy, Default)]
pub struct RatioPolicy;

impl PlacementPolicy for RatioPolicy {
    fn name(&self) -> &'static str {
        "ratio"
    }

    fn score(&self, request: &PodRequest, candidate: &Candidate<'_>) -> f64 {
        share(request.cpu_request as f64, candidate.cpu_left())
            + share(request.memory_request as f64, candidate.memory_left())
    }
}

fn share(request: f64, left: f64) -> f64 {
    if left > 0.0 {
        request / left
    } else {
        0.0
    }
}
