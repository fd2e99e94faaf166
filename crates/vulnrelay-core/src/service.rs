//! Delivery service
//!
//! Owns the queue, the adapter registry and the backend client, and runs
//! exactly one worker task for its lifetime. Producers call
//! [`DeliveryService::enqueue`] from any thread; items are processed in
//! arrival order.

use crate::adapter::AdapterRegistry;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::worker::Worker;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vulnrelay_client::BackendClient;
use vulnrelay_queue::{DeliveryQueue, QueueItem, ScanRequest};

/// Shared counters the worker increments
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) delivered: AtomicU64,
    pub(crate) not_relevant: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) expired: AtomicU64,
    pub(crate) requeued: AtomicU64,
}

/// Service statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Items currently waiting in the queue
    pub queued: usize,
    /// Items delivered and accepted by the backend
    pub delivered: u64,
    /// Items dropped because the backend had no interest
    pub not_relevant: u64,
    /// Items dropped on a permanent failure
    pub failed: u64,
    /// Items dropped because they outlived their timeout
    pub expired: u64,
    /// Requeue operations (transient failures and not-ready retries)
    pub requeued: u64,
}

/// The vulnerability scan delivery service
///
/// Spawned with [`DeliveryService::start`]; stopped gracefully with
/// [`DeliveryService::shutdown`]. Dropping the service without a shutdown
/// aborts nothing: the worker keeps the queue handle alive until its
/// current iteration ends and the runtime tears it down.
pub struct DeliveryService {
    queue: DeliveryQueue,
    registry: Arc<AdapterRegistry>,
    config: DeliveryConfig,
    paused: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

impl DeliveryService {
    /// Start the service and its worker task
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        config: DeliveryConfig,
        queue: DeliveryQueue,
        registry: AdapterRegistry,
        backend: Arc<dyn BackendClient>,
    ) -> Self {
        let registry = Arc::new(registry);
        let paused = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            queue: queue.clone(),
            registry: Arc::clone(&registry),
            backend,
            config: config.clone(),
            paused: Arc::clone(&paused),
            stats: Arc::clone(&stats),
        };
        let worker = tokio::spawn(worker.run(shutdown_rx));

        Self {
            queue,
            registry,
            config,
            paused,
            stats,
            shutdown_tx,
            worker,
        }
    }

    /// Queue a finished build's scan results for delivery
    ///
    /// Safe to call from any thread while the worker runs.
    ///
    /// # Errors
    /// `DeliveryError::UnknownTool` if no adapter is registered for the
    /// request's tool (configuration error, fail fast);
    /// `DeliveryError::Queue` if the durable log write fails.
    pub fn enqueue(&self, request: ScanRequest) -> Result<(), DeliveryError> {
        if !self.registry.contains(&request.tool) {
            return Err(DeliveryError::UnknownTool(request.tool));
        }

        let item = QueueItem::from_request(request, self.config.default_timeout);
        let key = item.key();
        self.queue.push(item)?;
        tracing::debug!("queued scan delivery for {key}");
        Ok(())
    }

    /// Pause processing without stopping the worker
    ///
    /// Producers may keep enqueueing; the worker idles until
    /// [`DeliveryService::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        tracing::info!("delivery processing paused");
    }

    /// Resume processing
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        tracing::info!("delivery processing resumed");
    }

    /// Whether processing is currently paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            queued: self.queue.len(),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            not_relevant: self.stats.not_relevant.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            requeued: self.stats.requeued.load(Ordering::Relaxed),
        }
    }

    /// Graceful shutdown
    ///
    /// Signals the worker to stop starting new iterations and waits for the
    /// in-flight one to finish. In-flight backend calls are not interrupted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.worker.await {
            tracing::error!("delivery worker task failed: {err}");
        }
    }
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("queued", &self.queue.len())
            .field("paused", &self.is_paused())
            .field("registry", &self.registry)
            .finish()
    }
}
