//! Admission queue and worker pool
//!
//! [`AdmissionPipeline::enqueue`] never blocks: when the bounded queue is
//! full the pod is dropped and stays unscheduled until a later event
//! observes it again. A fixed pool of workers shares the receiving end and
//! runs one placement decision at a time each.

mod dispatch;


pub use dispatch::Dispatcher;

use crate::models::PodRequest;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Queue and worker pool sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pods that may wait for a worker
    pub queue_capacity: usize,
    /// Concurrent placement decisions
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            workers: 50,
        }
    }
}

/// Result of offering a pod to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// Queue full or closed
    Dropped,
}

/// Bounded queue feeding a fixed pool of placement workers
pub struct AdmissionPipeline {
    config: PipelineConfig,
    /// `None` once closed
    tx: StdMutex<Option<mpsc::Sender<PodRequest>>>,
    rx: Arc<Mutex<mpsc::Receiver<PodRequest>>>,
    queued: Arc<AtomicUsize>,
    dispatcher: Arc<Dispatcher>,
}

impl AdmissionPipeline {
    pub fn new(config: PipelineConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            tx: StdMutex::new(Some(tx)),
            rx: Arc::new(Mutex::new(rx)),
            queued: Arc::new(AtomicUsize::new(0)),
            dispatcher,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pods currently waiting for a worker
    pub fn queue_length(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Offer a pod to the queue without waiting
    pub fn enqueue(&self, request: PodRequest) -> Admission {
        let pod = request.pod.clone();
        let metrics = self.dispatcher.metrics();
        let logger = self.dispatcher.logger();

        self.queued.fetch_add(1, Ordering::SeqCst);
        let sent = match self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            Some(tx) => tx.try_send(request),
            None => Err(TrySendError::Closed(request)),
        };
        match sent {
            Ok(()) => {
                let queue_length = self.queue_length();
                metrics.record_enqueued(queue_length);
                logger.log_enqueued(&pod, queue_length);
                Admission::Accepted
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let queue_length = self.queued.fetch_sub(1, Ordering::SeqCst) - 1;
                metrics.record_dropped(queue_length);
                logger.log_dropped(&pod, self.config.queue_capacity);
                Admission::Dropped
            }
        }
    }

    /// Stop accepting pods; workers drain what is queued and exit
    ///
    /// Drops the sending half, so idle workers see the end of the queue
    /// without the receiver lock being taken here.
    pub fn close(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if tx.is_some() {
            debug!("Admission queue closed");
        }
    }

    /// Spawn the worker pool
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Starting placement workers"
        );

        (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    rx: Arc::clone(&self.rx),
                    queued: Arc::clone(&self.queued),
                    dispatcher: Arc::clone(&self.dispatcher),
                };
                tokio::spawn(worker.run(shutdown.subscribe()))
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<PodRequest>>>,
    queued: Arc<AtomicUsize>,
    dispatcher: Arc<Dispatcher>,
}

impl Worker {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => break,
                next = async { self.rx.lock().await.recv().await } => next,
            };
            let Some(request) = next else {
                debug!(worker = self.id, "Admission queue closed and drained");
                break;
            };
            self.process(request).await;
        }
        debug!(worker = self.id, "Placement worker stopped");
    }

    async fn process(&self, request: PodRequest) {
        let queue_length = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        let metrics = self.dispatcher.metrics();
        let logger = self.dispatcher.logger();
        let pod = request.pod.clone();

        metrics.begin_decision(queue_length);
        let started = Instant::now();

        match self.dispatcher.schedule(request).await {
            Ok(placement) => {
                let elapsed = started.elapsed();
                metrics.record_scheduled(elapsed);
                logger.log_scheduled(&pod, &placement.node, &placement.tier, elapsed);
            }
            Err(e) => {
                metrics.record_failed(e.kind(), started.elapsed());
                logger.log_schedule_failed(&pod, &e);
            }
        }
    }
}
