//! Lifecycle reconciler
//!
//! Consumes the pod watch for pods that name this scheduler and keeps the
//! rest of the system in step with it:
//! - pending pods without a node are converted and queued for placement
//! - pods that failed with `OutOfmemory` / `OutOfcpu` are evicted with
//!   bounded retry on a detached task
//! - deleted pods are pruned from the snapshot
//!
//! The watch is re-opened after a delay whenever it ends or errors.

mod eviction;

#[cfg(test)]
mod tests;

pub use eviction::{delete_with_retry, EvictionOutcome, RetryPolicy};

use crate::cluster::{ClusterClient, EventType, PodEvent, PodPhase};
use crate::health::{Component, HealthRegistry};
use crate::models::{PodRef, PodRequest};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::pipeline::{Admission, AdmissionPipeline};
use crate::snapshot::ClusterSnapshot;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Failure reasons that trigger eviction
const STARVATION_REASONS: [&str; 2] = ["OutOfmemory", "OutOfcpu"];

/// Reconciler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Only pods requesting this scheduler are handled
    pub scheduler_name: String,
    /// Namespace to watch, empty watches all
    pub namespace: String,
    pub restart_delay_secs: u64,
    pub eviction: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "custom-scheduler".to_string(),
            namespace: String::new(),
            restart_delay_secs: 5,
            eviction: RetryPolicy::default(),
        }
    }
}

/// What the reconciler did with one event
#[derive(Debug)]
pub enum ReconcileAction {
    /// Not ours, or nothing to do
    Ignored,
    /// Deleted pod pruned; `removed` is false when it was not tracked
    Pruned { removed: bool },
    /// Eviction task spawned
    Evicting(JoinHandle<EvictionOutcome>),
    /// An eviction for this pod is already running
    EvictionInFlight,
    Enqueued(Admission),
    /// Resource quantities could not be parsed; pod skipped
    Rejected,
}

/// Event-driven lifecycle state machine
pub struct Reconciler {
    config: ReconcilerConfig,
    cluster: Arc<dyn ClusterClient>,
    pipeline: Arc<AdmissionPipeline>,
    snapshot: Arc<ClusterSnapshot>,
    metrics: Arc<SchedulerMetrics>,
    logger: StructuredLogger,
    health: HealthRegistry,
    evicting: Arc<Mutex<HashSet<PodRef>>>,
    shutdown: broadcast::Sender<()>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ReconcilerConfig,
        cluster: Arc<dyn ClusterClient>,
        pipeline: Arc<AdmissionPipeline>,
        snapshot: Arc<ClusterSnapshot>,
        metrics: Arc<SchedulerMetrics>,
        logger: StructuredLogger,
        health: HealthRegistry,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            config,
            cluster,
            pipeline,
            snapshot,
            metrics,
            logger,
            health,
            evicting: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Watch pods until shutdown, re-opening the watch when it drops
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let restart_delay = Duration::from_secs(self.config.restart_delay_secs);

        info!(
            scheduler = %self.config.scheduler_name,
            namespace = %self.config.namespace,
            "Starting pod reconciler"
        );

        loop {
            match self.cluster.watch_pods(&self.config.namespace).await {
                Ok(mut events) => {
                    self.health.set_healthy(Component::Reconciler).await;
                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!("Shutting down pod reconciler");
                                return;
                            }
                            item = events.next() => match item {
                                Some(Ok(event)) => {
                                    self.handle_event(event);
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Pod watch failed");
                                    self.health
                                        .set_degraded(Component::Reconciler, e.to_string())
                                        .await;
                                    break;
                                }
                                None => {
                                    debug!("Pod watch ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open pod watch");
                    self.health
                        .set_degraded(Component::Reconciler, e.to_string())
                        .await;
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down pod reconciler");
                    return;
                }
                _ = tokio::time::sleep(restart_delay) => {
                    info!(delay_secs = restart_delay.as_secs(), "Re-opening pod watch");
                }
            }
        }
    }

    /// Apply one watch event
    pub fn handle_event(&self, event: PodEvent) -> ReconcileAction {
        let pod = &event.pod;
        if pod.scheduler_name != self.config.scheduler_name {
            return ReconcileAction::Ignored;
        }
        let pod_ref = pod.pod_ref();

        if event.event_type == EventType::Deleted {
            let removed = self.snapshot.remove_pod(&pod_ref);
            debug!(pod = %pod_ref, removed, "Pod deleted");
            return ReconcileAction::Pruned { removed };
        }

        let starved = pod.phase == PodPhase::Failed
            && pod
                .reason
                .as_deref()
                .map_or(false, |r| STARVATION_REASONS.contains(&r));
        if starved {
            return self.start_eviction(pod_ref, pod.reason.as_deref().unwrap_or_default());
        }

        let unassigned = pod.node_name.as_deref().map_or(true, str::is_empty);
        if event.event_type == EventType::Added && pod.phase == PodPhase::Pending && unassigned {
            return match PodRequest::from_info(pod) {
                Ok(request) => ReconcileAction::Enqueued(self.pipeline.enqueue(request)),
                Err(e) => {
                    warn!(pod = %pod_ref, error = %e, "Skipping pod with malformed resources");
                    ReconcileAction::Rejected
                }
            };
        }

        ReconcileAction::Ignored
    }

    fn start_eviction(&self, pod: PodRef, reason: &str) -> ReconcileAction {
        {
            let mut evicting = self
                .evicting
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !evicting.insert(pod.clone()) {
                debug!(pod = %pod, "Eviction already in flight");
                return ReconcileAction::EvictionInFlight;
            }
        }

        info!(pod = %pod, reason = %reason, "Pod starved of resources, evicting");

        let cluster = Arc::clone(&self.cluster);
        let metrics = Arc::clone(&self.metrics);
        let logger = self.logger.clone();
        let evicting = Arc::clone(&self.evicting);
        let policy = self.config.eviction.clone();
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let outcome = delete_with_retry(cluster.as_ref(), &pod, &policy, &mut shutdown).await;
            match &outcome {
                EvictionOutcome::Deleted { attempts } => {
                    metrics.record_eviction(true);
                    logger.log_evicted(&pod, *attempts);
                }
                EvictionOutcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    metrics.record_eviction(false);
                    logger.log_eviction_failed(&pod, *attempts, last_error);
                }
                EvictionOutcome::Cancelled { .. } => {}
            }
            evicting
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&pod);
            outcome
        });

        ReconcileAction::Evicting(handle)
    }
}
