//! End-to-end delivery flows against instrumented fakes
//!
//! Covers the retry contract: expiry beats requeue, permanent failures are
//! processed exactly once, transient failures retry until a terminal
//! outcome, adapters are dispatched by tool, and the durable queue resumes
//! across a simulated restart.

use chrono::Utc;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use vulnrelay_core::{
    AdapterRegistry, DeliveryConfig, DeliveryError, DeliveryQueue, DeliveryService, QueueItem,
    ScanRequest,
};
use vulnrelay_test_utils::{wait_until, FakeAdapter, FakeBackend, PreflightStep, PushStep};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> DeliveryConfig {
    DeliveryConfig::new()
        .with_retry_backoff(Duration::from_millis(20))
        .with_skip_interval(Duration::from_millis(10))
        .with_idle_poll(Duration::from_millis(10))
}

fn start_with(
    backend: &Arc<FakeBackend>,
    adapter: &Arc<FakeAdapter>,
) -> DeliveryService {
    let registry = AdapterRegistry::new().with_adapter("ssc", Arc::clone(adapter) as _);
    DeliveryService::start(
        fast_config(),
        DeliveryQueue::in_memory(),
        registry,
        Arc::clone(backend) as _,
    )
}

#[tokio::test]
async fn delivers_ready_results() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);
    let stats = service.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(backend.preflight_calls(), 1);
    assert_eq!(backend.push_calls(), 1);
    assert_eq!(adapter.cleanup_calls(), 1);
    assert_eq!(
        backend.delivered(),
        vec![("job-a#1".to_string(), b"issues".to_vec())]
    );

    service.shutdown().await;
}

#[tokio::test]
async fn not_relevant_items_are_dropped_silently() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_preflight([PreflightStep::NotRelevant]);
    let adapter = Arc::new(FakeAdapter::ready(b"ignored".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().not_relevant == 1).await);
    assert_eq!(service.stats().queued, 0);
    // The adapter was never engaged, so no fetch and no cleanup.
    assert_eq!(adapter.fetch_calls(), 0);
    assert_eq!(adapter.cleanup_calls(), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn preflight_unavailable_is_retried_until_answered() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_preflight([
        PreflightStep::Unavailable,
        PreflightStep::Unavailable,
        PreflightStep::Relevant(None),
    ]);
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);
    assert_eq!(backend.preflight_calls(), 3);
    assert!(service.stats().requeued >= 2);

    service.shutdown().await;
}

#[tokio::test]
async fn transient_requeues_are_paced_by_the_skip_interval() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_preflight([
        PreflightStep::Unavailable,
        PreflightStep::Unavailable,
        PreflightStep::Relevant(None),
    ]);
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let registry = AdapterRegistry::new().with_adapter("ssc", Arc::clone(&adapter) as _);
    // Zero backoff isolates the per-requeue pacing.
    let config = DeliveryConfig::new()
        .with_retry_backoff(Duration::ZERO)
        .with_skip_interval(Duration::from_millis(50))
        .with_idle_poll(Duration::from_millis(10));
    let service = DeliveryService::start(
        config,
        DeliveryQueue::in_memory(),
        registry,
        Arc::clone(&backend) as _,
    );

    let started = std::time::Instant::now();
    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();
    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);

    // Two transient requeues, each followed by the skip interval.
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(service.stats().requeued, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn baseline_from_preflight_reaches_the_adapter() {
    let baseline = Utc::now();
    let backend = Arc::new(FakeBackend::new());
    backend.script_preflight([PreflightStep::Relevant(Some(baseline))]);
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);
    assert_eq!(adapter.last_baseline(), Some(baseline));

    service.shutdown().await;
}

#[tokio::test]
async fn push_retry_does_not_repeat_preflight() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_push([PushStep::Unavailable, PushStep::Accepted]);
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);
    assert_eq!(backend.push_calls(), 2);
    // The requeued copy already carries the approval, so the backend was
    // asked for relevance exactly once.
    assert_eq!(backend.preflight_calls(), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn permanent_push_failure_is_processed_exactly_once() {
    let backend = Arc::new(FakeBackend::new());
    backend.script_push([PushStep::Rejected]);
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().failed == 1).await);
    assert_eq!(service.stats().queued, 0);
    assert_eq!(adapter.cleanup_calls(), 1);

    // Give the worker room to (incorrectly) retry; the counts must hold.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.push_calls(), 1);
    assert_eq!(service.stats().failed, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn adapter_error_is_permanent() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::failing());
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().failed == 1).await);
    assert_eq!(adapter.cleanup_calls(), 1);
    assert_eq!(backend.push_calls(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.fetch_calls(), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn not_ready_scan_is_retried_until_ready() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready_after(2, b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);
    assert_eq!(adapter.fetch_calls(), 3);
    assert_eq!(service.stats().requeued, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn expired_item_is_dropped_instead_of_requeued() {
    let backend = Arc::new(FakeBackend::new());
    // Never becomes ready; only the timeout can end this item.
    let adapter = Arc::new(FakeAdapter::ready_after(usize::MAX, Vec::new()));
    let service = start_with(&backend, &adapter);

    service
        .enqueue(ScanRequest::new("job-a", "1", "ssc").with_timeout(Duration::ZERO))
        .unwrap();

    assert!(wait_until(WAIT, || service.stats().expired == 1).await);
    let stats = service.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.requeued, 0, "expired item must never be requeued");
    assert_eq!(adapter.fetch_calls(), 1);
    assert_eq!(adapter.cleanup_calls(), 1);

    service.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_fails_fast_at_enqueue() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    let err = service
        .enqueue(ScanRequest::new("job-a", "1", "fod"))
        .unwrap_err();
    assert!(matches!(err, DeliveryError::UnknownTool(tool) if tool.as_str() == "fod"));
    assert_eq!(service.stats().queued, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn persisted_item_with_unregistered_tool_fails_permanently() {
    // An item written by a previous run whose adapter is no longer
    // registered must not wedge the queue.
    let queue = DeliveryQueue::in_memory();
    let stale = QueueItem::from_request(
        ScanRequest::new("job-a", "1", "fod"),
        Duration::from_secs(60),
    );
    queue.push(stale).unwrap();

    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let registry = AdapterRegistry::new().with_adapter("ssc", Arc::clone(&adapter) as _);
    let service = DeliveryService::start(fast_config(), queue, registry, Arc::clone(&backend) as _);

    assert!(wait_until(WAIT, || service.stats().failed == 1).await);
    assert_eq!(service.stats().queued, 0);

    // The queue keeps working for properly registered tools.
    service.enqueue(ScanRequest::new("job-a", "2", "ssc")).unwrap();
    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);

    service.shutdown().await;
}

#[tokio::test]
async fn distinct_tools_dispatch_to_distinct_adapters() {
    let backend = Arc::new(FakeBackend::new());
    let ssc = Arc::new(FakeAdapter::ready(b"ssc-issues".to_vec()));
    let sonar = Arc::new(FakeAdapter::ready(b"sonar-issues".to_vec()));
    let registry = AdapterRegistry::new()
        .with_adapter("ssc", Arc::clone(&ssc) as _)
        .with_adapter("sonar", Arc::clone(&sonar) as _);
    let service = DeliveryService::start(
        fast_config(),
        DeliveryQueue::in_memory(),
        registry,
        Arc::clone(&backend) as _,
    );

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();
    service.enqueue(ScanRequest::new("job-b", "7", "sonar")).unwrap();

    assert!(wait_until(WAIT, || service.stats().delivered == 2).await);
    assert_eq!(ssc.fetch_calls(), 1);
    assert_eq!(sonar.fetch_calls(), 1);
    assert_eq!(
        backend.delivered(),
        vec![
            ("job-a#1".to_string(), b"ssc-issues".to_vec()),
            ("job-b#7".to_string(), b"sonar-issues".to_vec()),
        ]
    );

    service.shutdown().await;
}

#[tokio::test]
async fn pause_gates_processing() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let service = start_with(&backend, &adapter);

    service.pause();
    assert!(service.is_paused());
    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.fetch_calls(), 0);
    assert_eq!(service.stats().queued, 1);

    service.resume();
    assert!(wait_until(WAIT, || service.stats().delivered == 1).await);

    service.shutdown().await;
}

#[tokio::test]
async fn restart_resumes_pending_items_in_order() {
    let dir = tempfile::tempdir().unwrap();

    // First run: items queued but never processed (service paused), then a
    // graceful shutdown - the process "restart".
    {
        let queue = DeliveryQueue::open(dir.path(), 512).unwrap();
        let backend = Arc::new(FakeBackend::new());
        let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
        let registry = AdapterRegistry::new().with_adapter("ssc", Arc::clone(&adapter) as _);
        let service =
            DeliveryService::start(fast_config(), queue, registry, Arc::clone(&backend) as _);

        service.pause();
        service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();
        service.enqueue(ScanRequest::new("job-a", "2", "ssc")).unwrap();
        service.shutdown().await;
    }

    // Second run picks the items up in their original order.
    let queue = DeliveryQueue::open(dir.path(), 512).unwrap();
    assert_eq!(queue.len(), 2);

    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready(b"issues".to_vec()));
    let registry = AdapterRegistry::new().with_adapter("ssc", Arc::clone(&adapter) as _);
    let service =
        DeliveryService::start(fast_config(), queue, registry, Arc::clone(&backend) as _);

    assert!(wait_until(WAIT, || service.stats().delivered == 2).await);
    let keys: Vec<String> = backend.delivered().into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["job-a#1".to_string(), "job-a#2".to_string()]);

    service.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_worker() {
    let backend = Arc::new(FakeBackend::new());
    let adapter = Arc::new(FakeAdapter::ready_after(usize::MAX, Vec::new()));
    let service = start_with(&backend, &adapter);

    service.enqueue(ScanRequest::new("job-a", "1", "ssc")).unwrap();
    assert!(wait_until(WAIT, || adapter.fetch_calls() >= 1).await);

    service.shutdown().await;

    // No new iterations once shutdown resolves.
    let fetches = adapter.fetch_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.fetch_calls(), fetches);
}
