//! Periodic status report of the scheduling counters

use crate::observability::{SchedulerMetrics, SchedulerStats, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::info;

pub struct StatusReporter {
    metrics: Arc<SchedulerMetrics>,
    logger: StructuredLogger,
    workers: usize,
    interval: Duration,
}

impl StatusReporter {
    pub fn new(
        metrics: Arc<SchedulerMetrics>,
        logger: StructuredLogger,
        workers: usize,
        interval: Duration,
    ) -> Self {
        Self {
            metrics,
            logger,
            workers,
            interval,
        }
    }

    /// Workers not busy with a decision
    pub fn workers_available(&self, stats: &SchedulerStats) -> u64 {
        (self.workers as u64).saturating_sub(stats.active)
    }

    /// Log the current counters and return them
    pub fn report(&self) -> SchedulerStats {
        let stats = self.metrics.stats();
        self.logger.log_status(&stats, self.workers_available(&stats));
        stats
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down status reporter");
                    break;
                }
            }
        }
    }
}
