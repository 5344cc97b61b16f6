//! Best-effort rules used when no node passes the primary filter

use super::PlacementConfig;
use crate::models::{Node, PodRequest, UsageSample};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Which fallback rule picked the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackRule {
    /// Large CPU request: least CPU in use
    MinCpu,
    /// Large memory request: least memory in use
    MinMemory,
    /// Least combined usage
    MinCombined,
}

impl fmt::Display for FallbackRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FallbackRule::MinCpu => "min_cpu",
            FallbackRule::MinMemory => "min_memory",
            FallbackRule::MinCombined => "min_combined",
        };
        f.write_str(name)
    }
}

/// Pick a node ignoring capacity; `ordered` must be sorted by name
pub(super) fn select(
    request: &PodRequest,
    ordered: &[&Node],
    usage: &UsageSample,
    config: &PlacementConfig,
) -> Option<(String, FallbackRule)> {
    let (rule, node) = if request.cpu_request >= config.fallback_cpu_threshold {
        (FallbackRule::MinCpu, min_by(ordered, |n| reading(&usage.cpu, n)))
    } else if request.memory_request > config.fallback_memory_threshold {
        (
            FallbackRule::MinMemory,
            min_by(ordered, |n| reading(&usage.memory, n)),
        )
    } else {
        (
            FallbackRule::MinCombined,
            min_by(ordered, |n| {
                usage
                    .node_usage(&n.name)
                    .map(|(cpu, memory)| (cpu + memory).abs())
            }),
        )
    };

    node.map(|name| (name, rule))
}

fn reading(values: &HashMap<String, f64>, node: &Node) -> Option<f64> {
    values.get(&node.name).copied()
}

/// Node with the smallest value; the first in order wins ties
fn min_by<F>(ordered: &[&Node], value: F) -> Option<String>
where
    F: Fn(&Node) -> Option<f64>,
{
    let mut best: Option<(&Node, f64)> = None;
    for &node in ordered {
        let Some(v) = value(node).filter(|v| v.is_finite()) else {
            continue;
        };
        if best.map_or(true, |(_, min)| v < min) {
            best = Some((node, v));
        }
    }
    best.map(|(node, _)| node.name.clone())
}
