//! Resource-aware pod placement for Kubernetes
//!
//! This crate provides the core functionality for:
//! - Placement decisions from live node telemetry
//! - A bounded admission queue with a fixed worker pool
//! - Pod lifecycle reconciliation and eviction of starved pods
//! - Cluster and telemetry adapters
//! - Health checks and observability

pub mod bootstrap;
pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod pipeline;
pub mod placement;
pub mod quantity;
pub mod reconciler;
pub mod snapshot;
pub mod status;
pub mod usage_log;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ScheduleError;
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, SchedulerStats, StructuredLogger};
