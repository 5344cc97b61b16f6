//! One placement decision: sample, choose, bind, record

use crate::cluster::ClusterClient;
use crate::error::ScheduleError;
use crate::health::{Component, HealthRegistry};
use crate::models::PodRequest;
use crate::monitor::{fetch_usage_sample, MetricsProvider};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::placement::{Placement, PlacementEngine};
use crate::snapshot::ClusterSnapshot;
use std::sync::Arc;

/// Everything a worker needs to place a pod
pub struct Dispatcher {
    cluster: Arc<dyn ClusterClient>,
    monitor: Arc<dyn MetricsProvider>,
    engine: Arc<PlacementEngine>,
    snapshot: Arc<ClusterSnapshot>,
    metrics: Arc<SchedulerMetrics>,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Dispatcher {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        monitor: Arc<dyn MetricsProvider>,
        engine: Arc<PlacementEngine>,
        snapshot: Arc<ClusterSnapshot>,
        metrics: Arc<SchedulerMetrics>,
        logger: StructuredLogger,
        health: HealthRegistry,
    ) -> Self {
        Self {
            cluster,
            monitor,
            engine,
            snapshot,
            metrics,
            logger,
            health,
        }
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Place one pod and record it in the snapshot
    ///
    /// Usage is sampled fresh for every call. Nothing is retried; on error
    /// the pod stays unscheduled and the snapshot is untouched.
    pub async fn schedule(&self, request: PodRequest) -> Result<Placement, ScheduleError> {
        let usage = match fetch_usage_sample(self.monitor.as_ref()).await {
            Ok(usage) => {
                self.health.set_healthy(Component::Monitor).await;
                usage
            }
            Err(e) => {
                self.health
                    .set_degraded(Component::Monitor, e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        let nodes = self.snapshot.nodes();
        let placement = self
            .engine
            .choose(&request, &nodes, &usage)
            .ok_or_else(|| ScheduleError::Infeasible {
                pod: request.pod.clone(),
            })?;

        self.cluster
            .bind_pod(&request.pod, &placement.node)
            .await
            .map_err(|source| ScheduleError::Bind {
                pod: request.pod.clone(),
                node: placement.node.clone(),
                source,
            })?;

        self.snapshot.record_placement(request, &placement.node);
        Ok(placement)
    }
}
