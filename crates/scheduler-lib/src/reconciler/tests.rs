use super::*;
use crate::cluster::{ClusterError, PodInfo};
use crate::models::Node;
use crate::monitor::MetricsProvider;
use crate::pipeline::{Dispatcher, PipelineConfig};
use crate::placement::{PlacementConfig, PlacementEngine};
use crate::test_support::{event, pod_info, FakeCluster, StaticMonitor};
use tokio::time::Instant;

const GIB: u64 = 1 << 30;

struct Harness {
    cluster: Arc<FakeCluster>,
    snapshot: Arc<ClusterSnapshot>,
    metrics: Arc<SchedulerMetrics>,
    pipeline: Arc<AdmissionPipeline>,
    health: HealthRegistry,
    shutdown: broadcast::Sender<()>,
    reconciler: Arc<Reconciler>,
}

async fn harness(cluster: FakeCluster) -> Harness {
    let cluster = Arc::new(cluster);
    let monitor: Arc<dyn MetricsProvider> = Arc::new(StaticMonitor::unavailable());
    let snapshot = Arc::new(ClusterSnapshot::new(vec![Node::new("node1", 4000, 8 * GIB)]));
    let metrics = Arc::new(SchedulerMetrics::new().unwrap());
    let logger = StructuredLogger::new("custom-scheduler");
    let health = HealthRegistry::new();
    health.register_all().await;
    let (shutdown, _) = broadcast::channel(4);

    let dispatcher = Arc::new(Dispatcher::new(
        cluster.clone(),
        monitor,
        Arc::new(PlacementEngine::new(PlacementConfig::default())),
        snapshot.clone(),
        metrics.clone(),
        logger.clone(),
        health.clone(),
    ));
    let pipeline = Arc::new(AdmissionPipeline::new(
        PipelineConfig {
            queue_capacity: 10,
            workers: 1,
        },
        dispatcher,
    ));

    let reconciler = Arc::new(Reconciler::new(
        ReconcilerConfig::default(),
        cluster.clone(),
        pipeline.clone(),
        snapshot.clone(),
        metrics.clone(),
        logger,
        health.clone(),
        shutdown.clone(),
    ));

    Harness {
        cluster,
        snapshot,
        metrics,
        pipeline,
        health,
        shutdown,
        reconciler,
    }
}

fn pending(name: &str) -> PodInfo {
    pod_info(name, PodPhase::Pending, "500m", "1Gi")
}

fn starved(name: &str, reason: &str) -> PodInfo {
    let mut pod = pod_info(name, PodPhase::Failed, "500m", "1Gi");
    pod.node_name = Some("node1".to_string());
    pod.reason = Some(reason.to_string());
    pod
}

fn apply(h: &Harness, event_type: EventType, pod: PodInfo) -> ReconcileAction {
    h.reconciler.handle_event(PodEvent::new(event_type, pod))
}

#[tokio::test]
async fn test_added_pending_pod_is_enqueued() {
    let h = harness(FakeCluster::new()).await;

    let action = apply(&h, EventType::Added, pending("web-0"));
    assert!(matches!(action, ReconcileAction::Enqueued(Admission::Accepted)));
    assert_eq!(h.pipeline.queue_length(), 1);
}

#[tokio::test]
async fn test_other_schedulers_and_states_are_ignored() {
    let h = harness(FakeCluster::new()).await;

    let mut foreign = pending("web-0");
    foreign.scheduler_name = "default-scheduler".to_string();
    assert!(matches!(
        apply(&h, EventType::Added, foreign),
        ReconcileAction::Ignored
    ));

    let mut assigned = pending("web-1");
    assigned.node_name = Some("node1".to_string());
    assert!(matches!(
        apply(&h, EventType::Added, assigned),
        ReconcileAction::Ignored
    ));

    assert!(matches!(
        apply(&h, EventType::Modified, pending("web-2")),
        ReconcileAction::Ignored
    ));

    let mut foreign_starved = starved("web-3", "OutOfcpu");
    foreign_starved.scheduler_name = "default-scheduler".to_string();
    assert!(matches!(
        apply(&h, EventType::Modified, foreign_starved),
        ReconcileAction::Ignored
    ));

    assert!(matches!(
        apply(&h, EventType::Modified, starved("web-4", "Evicted")),
        ReconcileAction::Ignored
    ));

    assert_eq!(h.pipeline.queue_length(), 0);
}

#[tokio::test]
async fn test_malformed_quantity_skips_pod() {
    let h = harness(FakeCluster::new()).await;

    let pod = pod_info("web-0", PodPhase::Pending, "two cores", "1Gi");
    assert!(matches!(
        apply(&h, EventType::Added, pod),
        ReconcileAction::Rejected
    ));
    assert_eq!(h.pipeline.queue_length(), 0);
}

#[tokio::test]
async fn test_deleted_pod_is_pruned_once() {
    let h = harness(FakeCluster::new()).await;
    let request = PodRequest::from_info(&pending("web-0")).unwrap();
    h.snapshot.record_placement(request, "node1");

    let action = apply(&h, EventType::Deleted, pending("web-0"));
    assert!(matches!(action, ReconcileAction::Pruned { removed: true }));

    let action = apply(&h, EventType::Deleted, pending("web-0"));
    assert!(matches!(action, ReconcileAction::Pruned { removed: false }));
    assert_eq!(h.snapshot.pod_count(), 0);
}

#[tokio::test]
async fn test_deleted_takes_precedence_over_failure() {
    let h = harness(FakeCluster::new()).await;

    let action = apply(&h, EventType::Deleted, starved("web-0", "OutOfmemory"));
    assert!(matches!(action, ReconcileAction::Pruned { .. }));
    assert!(h.cluster.deletes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_eviction_retries_with_linear_backoff() {
    let h = harness(FakeCluster::new()).await;
    h.cluster.fail_deletes(2);
    let started = Instant::now();

    let ReconcileAction::Evicting(handle) =
        apply(&h, EventType::Modified, starved("web-0", "OutOfcpu"))
    else {
        panic!("eviction not started");
    };

    assert_eq!(handle.await.unwrap(), EvictionOutcome::Deleted { attempts: 3 });
    // 2s after the first failure, 4s after the second
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(h.cluster.deletes(), vec![PodRef::new("k8s", "web-0")]);
    assert_eq!(h.metrics.stats().evictions_succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_stops_on_first_success() {
    let h = harness(FakeCluster::new()).await;
    let started = Instant::now();

    let ReconcileAction::Evicting(handle) =
        apply(&h, EventType::Added, starved("web-0", "OutOfmemory"))
    else {
        panic!("eviction not started");
    };

    assert_eq!(handle.await.unwrap(), EvictionOutcome::Deleted { attempts: 1 });
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_gives_up_and_is_not_duplicated() {
    let h = harness(FakeCluster::new()).await;
    h.cluster.fail_deletes(10);
    let started = Instant::now();

    let ReconcileAction::Evicting(handle) =
        apply(&h, EventType::Modified, starved("web-0", "OutOfcpu"))
    else {
        panic!("eviction not started");
    };
    assert!(matches!(
        apply(&h, EventType::Modified, starved("web-0", "OutOfcpu")),
        ReconcileAction::EvictionInFlight
    ));

    let outcome = handle.await.unwrap();
    assert!(matches!(
        outcome,
        EvictionOutcome::Exhausted { attempts: 3, ref last_error } if last_error.contains("timed out")
    ));
    // no wait after the final attempt
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(h.metrics.stats().evictions_failed, 1);

    // a later failure event may try again
    assert!(matches!(
        apply(&h, EventType::Modified, starved("web-0", "OutOfcpu")),
        ReconcileAction::Evicting(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let h = harness(FakeCluster::new()).await;
    h.cluster.fail_deletes(10);

    let ReconcileAction::Evicting(handle) =
        apply(&h, EventType::Modified, starved("web-0", "OutOfcpu"))
    else {
        panic!("eviction not started");
    };
    h.shutdown.send(()).unwrap();

    assert_eq!(
        handle.await.unwrap(),
        EvictionOutcome::Cancelled { attempts: 1 }
    );
    assert_eq!(h.metrics.stats().evictions_failed, 0);
}

#[test]
fn test_retry_delay_is_linear() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    assert_eq!(policy.delay_after(2), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_watch_is_reopened_until_shutdown() {
    let cluster = FakeCluster::new();
    cluster.push_watch(vec![
        event(EventType::Added, pending("web-0")),
        Err(ClusterError::Watch("connection reset".to_string())),
        event(EventType::Added, pending("never-read")),
    ]);
    cluster.push_watch(vec![event(EventType::Added, pending("web-1"))]);
    let h = harness(cluster).await;

    let reconciler = h.reconciler.clone();
    let task = tokio::spawn(async move { reconciler.run().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.cluster.watch_calls(), 1);
    assert_eq!(h.pipeline.queue_length(), 1);
    assert_eq!(
        h.health.status(Component::Reconciler).await,
        Some(crate::health::ComponentStatus::Degraded)
    );

    // second watch after the restart delay, third after it ends
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.cluster.watch_calls(), 3);
    assert_eq!(h.pipeline.queue_length(), 2);

    h.shutdown.send(()).unwrap();
    task.await.unwrap();
}
