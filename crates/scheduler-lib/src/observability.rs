//! Observability infrastructure for the scheduler
//!
//! Provides:
//! - Scheduling counters mirrored into a Prometheus registry
//! - Structured JSON logging with tracing

use crate::error::ScheduleError;
use crate::models::PodRef;
use crate::placement::PlacementTier;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for placement decision latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Point-in-time copy of the scheduling counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Pods bound successfully
    pub scheduled: u64,
    /// Decisions that left the pod unscheduled
    pub failed: u64,
    /// Decisions in flight
    pub active: u64,
    /// Pods waiting in the admission queue
    pub queue_length: u64,
    /// Pods rejected because the queue was full
    pub dropped: u64,
    pub evictions_succeeded: u64,
    pub evictions_failed: u64,
}

struct PromMetrics {
    scheduled: IntCounter,
    failed: IntCounterVec,
    active: IntGauge,
    queue_length: IntGauge,
    dropped: IntCounter,
    evictions: IntCounterVec,
    decision_latency_seconds: Histogram,
}

impl PromMetrics {
    fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            scheduled: IntCounter::new(
                "scheduler_pods_scheduled_total",
                "Total number of pods bound to a node",
            )?,
            failed: IntCounterVec::new(
                Opts::new(
                    "scheduler_pods_failed_total",
                    "Total number of placement attempts that left the pod unscheduled",
                ),
                &["reason"],
            )?,
            active: IntGauge::new(
                "scheduler_active_decisions",
                "Number of placement decisions in flight",
            )?,
            queue_length: IntGauge::new(
                "scheduler_queue_length",
                "Number of pods waiting in the admission queue",
            )?,
            dropped: IntCounter::new(
                "scheduler_pods_dropped_total",
                "Total number of pods dropped because the admission queue was full",
            )?,
            evictions: IntCounterVec::new(
                Opts::new(
                    "scheduler_evictions_total",
                    "Total number of resource-starved pod evictions by outcome",
                ),
                &["outcome"],
            )?,
            decision_latency_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "scheduler_decision_latency_seconds",
                    "Time from dequeue to bind for one placement decision",
                )
                .buckets(LATENCY_BUCKETS.to_vec()),
            )?,
        };

        registry.register(Box::new(metrics.scheduled.clone()))?;
        registry.register(Box::new(metrics.failed.clone()))?;
        registry.register(Box::new(metrics.active.clone()))?;
        registry.register(Box::new(metrics.queue_length.clone()))?;
        registry.register(Box::new(metrics.dropped.clone()))?;
        registry.register(Box::new(metrics.evictions.clone()))?;
        registry.register(Box::new(metrics.decision_latency_seconds.clone()))?;

        Ok(metrics)
    }
}

/// Shared scheduling counters
///
/// Every update takes one lock, so [`SchedulerMetrics::stats`] always returns
/// a consistent copy. Each instance owns its own Prometheus registry.
pub struct SchedulerMetrics {
    stats: Mutex<SchedulerStats>,
    registry: Registry,
    prom: PromMetrics,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let prom = PromMetrics::register(&registry)?;
        Ok(Self {
            stats: Mutex::new(SchedulerStats::default()),
            registry,
            prom,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registry to expose on the metrics endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.lock()
    }

    /// A pod entered the queue
    pub fn record_enqueued(&self, queue_length: usize) {
        let mut stats = self.lock();
        self.set_queue_length(&mut stats, queue_length);
    }

    /// A pod was rejected at admission
    pub fn record_dropped(&self, queue_length: usize) {
        let mut stats = self.lock();
        stats.dropped += 1;
        self.prom.dropped.inc();
        self.set_queue_length(&mut stats, queue_length);
    }

    /// A worker took a pod off the queue
    pub fn begin_decision(&self, queue_length: usize) {
        let mut stats = self.lock();
        stats.active += 1;
        self.prom.active.set(stats.active as i64);
        self.set_queue_length(&mut stats, queue_length);
    }

    /// A decision ended with a successful bind
    pub fn record_scheduled(&self, elapsed: Duration) {
        let mut stats = self.lock();
        stats.scheduled += 1;
        self.prom.scheduled.inc();
        self.end_decision(&mut stats, elapsed);
    }

    /// A decision ended without a bind
    pub fn record_failed(&self, reason: &str, elapsed: Duration) {
        let mut stats = self.lock();
        stats.failed += 1;
        self.prom.failed.with_label_values(&[reason]).inc();
        self.end_decision(&mut stats, elapsed);
    }

    pub fn record_eviction(&self, succeeded: bool) {
        let mut stats = self.lock();
        let outcome = if succeeded {
            stats.evictions_succeeded += 1;
            "deleted"
        } else {
            stats.evictions_failed += 1;
            "exhausted"
        };
        self.prom.evictions.with_label_values(&[outcome]).inc();
    }

    fn set_queue_length(&self, stats: &mut SchedulerStats, queue_length: usize) {
        stats.queue_length = queue_length as u64;
        self.prom.queue_length.set(queue_length as i64);
    }

    fn end_decision(&self, stats: &mut SchedulerStats, elapsed: Duration) {
        stats.active = stats.active.saturating_sub(1);
        self.prom.active.set(stats.active as i64);
        self.prom
            .decision_latency_seconds
            .observe(elapsed.as_secs_f64());
    }
}

/// Structured logger for scheduler events
///
/// Provides consistent JSON-formatted logging for placement decisions,
/// evictions, and lifecycle events.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    scheduler_name: String,
}

impl StructuredLogger {
    pub fn new(scheduler_name: impl Into<String>) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
        }
    }

    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    pub fn log_enqueued(&self, pod: &PodRef, queue_length: usize) {
        info!(
            event = "pod_enqueued",
            scheduler = %self.scheduler_name,
            pod = %pod,
            queue_length = queue_length,
            "Pod queued for placement"
        );
    }

    pub fn log_dropped(&self, pod: &PodRef, capacity: usize) {
        warn!(
            event = "pod_dropped",
            scheduler = %self.scheduler_name,
            pod = %pod,
            capacity = capacity,
            "Admission queue full, pod left unscheduled"
        );
    }

    pub fn log_scheduled(&self, pod: &PodRef, node: &str, tier: &PlacementTier, elapsed: Duration) {
        match tier {
            PlacementTier::Primary {
                score,
                scaled_score,
            } => {
                info!(
                    event = "pod_scheduled",
                    scheduler = %self.scheduler_name,
                    pod = %pod,
                    node = %node,
                    tier = "primary",
                    score = score,
                    scaled_score = scaled_score,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Pod bound to node"
                );
            }
            PlacementTier::Fallback(rule) => {
                warn!(
                    event = "pod_scheduled",
                    scheduler = %self.scheduler_name,
                    pod = %pod,
                    node = %node,
                    tier = "fallback",
                    rule = %rule,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Pod bound to node by fallback rule, node may be overcommitted"
                );
            }
        }
    }

    pub fn log_schedule_failed(&self, pod: &PodRef, error: &ScheduleError) {
        let node = match error {
            ScheduleError::Bind { node, .. } => Some(node.as_str()),
            _ => None,
        };
        let source = std::error::Error::source(error).map(|e| e.to_string());

        warn!(
            event = "schedule_failed",
            scheduler = %self.scheduler_name,
            pod = %pod,
            reason = error.kind(),
            node = ?node,
            error = %error,
            cause = ?source,
            "Placement failed, pod left unscheduled"
        );
    }

    pub fn log_evicted(&self, pod: &PodRef, attempts: u32) {
        info!(
            event = "pod_evicted",
            scheduler = %self.scheduler_name,
            pod = %pod,
            attempts = attempts,
            "Evicted resource-starved pod"
        );
    }

    pub fn log_eviction_failed(&self, pod: &PodRef, attempts: u32, last_error: &str) {
        warn!(
            event = "eviction_failed",
            scheduler = %self.scheduler_name,
            pod = %pod,
            attempts = attempts,
            last_error = %last_error,
            terminal = true,
            "Giving up on evicting pod"
        );
    }

    pub fn log_status(&self, stats: &SchedulerStats, workers_available: u64) {
        info!(
            event = "scheduler_status",
            scheduler = %self.scheduler_name,
            scheduled = stats.scheduled,
            failed = stats.failed,
            active = stats.active,
            queue_length = stats.queue_length,
            dropped = stats.dropped,
            evictions_succeeded = stats.evictions_succeeded,
            evictions_failed = stats.evictions_failed,
            workers_available = workers_available,
            "Scheduler status"
        );
    }

    pub fn log_startup(&self, version: &str, nodes: &[String]) {
        info!(
            event = "scheduler_started",
            scheduler = %self.scheduler_name,
            version = %version,
            nodes = ?nodes,
            "Scheduler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            scheduler = %self.scheduler_name,
            reason = %reason,
            "Scheduler shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_decision_counters() {
        let metrics = SchedulerMetrics::new().unwrap();

        metrics.record_enqueued(1);
        metrics.record_enqueued(2);
        metrics.begin_decision(1);
        metrics.begin_decision(0);
        assert_eq!(metrics.stats().active, 2);

        metrics.record_scheduled(Duration::from_millis(5));
        metrics.record_failed("infeasible", Duration::from_millis(5));

        let stats = metrics.stats();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_length, 0);
    }

    #[test]
    fn test_dropped_and_evictions() {
        let metrics = SchedulerMetrics::new().unwrap();
        metrics.record_dropped(2);
        metrics.record_eviction(true);
        metrics.record_eviction(false);

        let stats = metrics.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.queue_length, 2);
        assert_eq!(stats.evictions_succeeded, 1);
        assert_eq!(stats.evictions_failed, 1);
    }

    #[test]
    fn test_instances_have_separate_registries() {
        let first = SchedulerMetrics::new().unwrap();
        let second = SchedulerMetrics::new().unwrap();
        first.record_scheduled(Duration::from_millis(1));

        assert_eq!(second.stats().scheduled, 0);

        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&first.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("scheduler_pods_scheduled_total 1"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("custom-scheduler");
        assert_eq!(logger.scheduler_name(), "custom-scheduler");
    }
}
