//! Placement decision engine
//!
//! Turns a pod request plus a fresh [`UsageSample`] into a chosen node. The
//! primary phase filters nodes by feasibility and the control-plane reserve
//! and scores survivors with the configured [`PlacementPolicy`]. When nothing
//! survives, a fallback rule picks the least loaded node without checking
//! capacity.

mod fallback;
mod policy;


pub use fallback::FallbackRule;
pub use policy::{BalancePolicy, Candidate, PlacementPolicy, RatioPolicy};

use crate::models::{Node, PodRequest, UsageSample};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const GIB: u64 = 1 << 30;

/// Scoring policy used by the primary phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Keep projected CPU and memory utilisation close to each other
    #[default]
    Balance,
    /// Prefer the node the request fills the largest share of
    Ratio,
}

/// Placement parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub policy: PolicyKind,
    /// Node that must keep headroom for the control plane
    pub control_plane_node: String,
    /// Free CPU the control-plane node keeps after a placement, milli-cores
    pub control_plane_cpu_headroom: u64,
    /// Free memory the control-plane node keeps after a placement, bytes
    pub control_plane_memory_headroom: u64,
    /// Requests at or above this CPU go to the least CPU-loaded node
    pub fallback_cpu_threshold: u64,
    /// Requests above this memory go to the least memory-loaded node
    pub fallback_memory_threshold: u64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Balance,
            control_plane_node: "master".to_string(),
            control_plane_cpu_headroom: 2000,
            control_plane_memory_headroom: 4 * GIB,
            fallback_cpu_threshold: 4000,
            fallback_memory_threshold: 10 * GIB,
        }
    }
}

/// How a placement was decided
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlacementTier {
    /// Best score among feasible nodes; `scaled_score` is the reported value
    Primary { score: f64, scaled_score: f64 },
    Fallback(FallbackRule),
}

impl fmt::Display for PlacementTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementTier::Primary { .. } => write!(f, "primary"),
            PlacementTier::Fallback(rule) => write!(f, "fallback:{rule}"),
        }
    }
}

/// A chosen node
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub node: String,
    pub tier: PlacementTier,
}

/// Stateless placement engine, safe to share between workers
pub struct PlacementEngine {
    config: PlacementConfig,
    policy: Box<dyn PlacementPolicy>,
}

impl PlacementEngine {
    pub fn new(config: PlacementConfig) -> Self {
        let policy: Box<dyn PlacementPolicy> = match config.policy {
            PolicyKind::Balance => Box::new(BalancePolicy),
            PolicyKind::Ratio => Box::new(RatioPolicy),
        };
        Self { config, policy }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Choose a node for `request`, or `None` when no node reports usage
    pub fn choose(
        &self,
        request: &PodRequest,
        nodes: &[Node],
        usage: &UsageSample,
    ) -> Option<Placement> {
        let mut ordered: Vec<&Node> = nodes.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(placement) = self.primary(request, &ordered, usage) {
            return Some(placement);
        }

        let (node, rule) = fallback::select(request, &ordered, usage, &self.config)?;
        debug!(
            pod = %request.pod,
            node = %node,
            rule = %rule,
            "No feasible node, using fallback"
        );
        Some(Placement {
            node,
            tier: PlacementTier::Fallback(rule),
        })
    }

    fn primary(
        &self,
        request: &PodRequest,
        ordered: &[&Node],
        usage: &UsageSample,
    ) -> Option<Placement> {
        let mut best: Option<(&Node, f64)> = None;

        for &node in ordered {
            if node.capacity_cpu == 0 || node.capacity_memory == 0 {
                continue;
            }
            let Some((cpu_used, memory_used)) = usage.node_usage(&node.name) else {
                continue;
            };
            let candidate = Candidate {
                node,
                cpu_used,
                memory_used,
            };

            if !self.admits(request, &candidate) {
                continue;
            }

            let score = self.policy.score(request, &candidate);
            debug!(
                pod = %request.pod,
                node = %node.name,
                policy = self.policy.name(),
                score,
                "Scored candidate"
            );

            if !score.is_finite() {
                continue;
            }
            // strict comparison keeps the first node in name order on ties
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((node, score));
            }
        }

        best.map(|(node, score)| Placement {
            node: node.name.clone(),
            tier: PlacementTier::Primary {
                score,
                scaled_score: self.policy.scale(score, ordered.len()),
            },
        })
    }

    /// Feasibility plus the control-plane reserve
    fn admits(&self, request: &PodRequest, candidate: &Candidate<'_>) -> bool {
        let cpu_left = candidate.cpu_left();
        let memory_left = candidate.memory_left();
        let cpu = request.cpu_request as f64;
        let memory = request.memory_request as f64;

        if !cpu_left.is_finite() || !memory_left.is_finite() {
            return false;
        }
        if cpu > cpu_left || memory > memory_left {
            return false;
        }

        if candidate.node.name == self.config.control_plane_node {
            let cpu_after = cpu_left - cpu;
            let memory_after = memory_left - memory;
            if cpu_after < self.config.control_plane_cpu_headroom as f64
                || memory_after < self.config.control_plane_memory_headroom as f64
            {
                return false;
            }
        }

        true
    }
}
