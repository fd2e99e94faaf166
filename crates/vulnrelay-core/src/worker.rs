//! The single delivery worker
//!
//! One worker per service instance, processing items strictly one at a
//! time. Head-of-line blocking is deliberate: a slow or never-ready item
//! delays everything behind it until its timeout elapses.
//!
//! Processing is split into a pure reducer ([`Worker::process`]) that maps a
//! head item to a [`Verdict`] without touching the queue, and an applier
//! ([`Worker::apply`]) that performs the resulting queue operations. The
//! item itself is never mutated; stages hand forward updated copies.

use crate::adapter::AdapterRegistry;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::service::StatsCounters;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use vulnrelay_client::BackendClient;
use vulnrelay_queue::{DeliveryQueue, QueueError, QueueItem};

/// Terminal or retry decision for one head item
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Results pushed and accepted by the backend
    Delivered { item: QueueItem },
    /// Backend has no interest in this build; drop silently
    NotRelevant,
    /// Non-retryable failure; pop unconditionally
    Failed {
        item: QueueItem,
        error: DeliveryError,
    },
    /// Retry-eligible; requeue at the tail unless the item expired
    Retry { item: QueueItem, kind: RetryKind },
}

/// Why an item is being retried
///
/// Every requeue is followed by the skip-interval pause; a transient
/// backend failure additionally breathes for the retry backoff first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryKind {
    /// Backend answered 502/503
    BackendUnavailable,
    /// Remote scan has not completed yet
    ScanNotReady,
}

pub(crate) struct Worker {
    pub(crate) queue: DeliveryQueue,
    pub(crate) registry: Arc<AdapterRegistry>,
    pub(crate) backend: Arc<dyn BackendClient>,
    pub(crate) config: DeliveryConfig,
    pub(crate) paused: Arc<AtomicBool>,
    pub(crate) stats: Arc<StatsCounters>,
}

impl Worker {
    /// Loop until shutdown is signalled
    ///
    /// The in-flight iteration always finishes; shutdown only prevents new
    /// ones from starting. A retry delay interrupted by shutdown leaves the
    /// item at the head, where the next run (or process) picks it up.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("delivery worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.paused.load(Ordering::Relaxed) {
                if wait(self.config.idle_poll, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let Some(head) = self.queue.peek() else {
                if wait(self.config.idle_poll, &mut shutdown).await {
                    break;
                }
                continue;
            };

            let verdict = self.process(&head).await;
            if let Err(err) = self.apply(verdict, &mut shutdown).await {
                // A failed log write leaves the head in the store; back off
                // and retry it instead of losing it.
                tracing::error!("queue operation failed: {err}");
                if wait(self.config.idle_poll, &mut shutdown).await {
                    break;
                }
            }
        }
        tracing::info!("delivery worker stopped");
    }

    /// Reduce a head item to a verdict: preflight, fetch, push
    ///
    /// Pure with respect to the queue; the only effects are the backend and
    /// adapter calls themselves.
    async fn process(&self, item: &QueueItem) -> Verdict {
        let mut current = item.clone();

        if !current.relevant {
            match self
                .backend
                .preflight(&current.job_id, &current.build_id)
                .await
            {
                Ok(None) => {
                    tracing::debug!("{} not relevant to backend, dropping", current.key());
                    return Verdict::NotRelevant;
                }
                Ok(Some(approval)) => {
                    // The approved copy is what gets requeued on a later
                    // transient failure, so preflight runs at most once
                    // per item.
                    current = current.approved(approval.baseline);
                }
                Err(err) if err.is_transient() => {
                    return Verdict::Retry {
                        item: current,
                        kind: RetryKind::BackendUnavailable,
                    };
                }
                Err(err) => {
                    return Verdict::Failed {
                        item: current,
                        error: err.into(),
                    };
                }
            }
        }

        let Some(adapter) = self.registry.get(&current.tool) else {
            let tool = current.tool.clone();
            return Verdict::Failed {
                item: current,
                error: DeliveryError::UnknownTool(tool),
            };
        };

        match adapter.fetch_results(&current).await {
            Ok(None) => Verdict::Retry {
                item: current,
                kind: RetryKind::ScanNotReady,
            },
            Ok(Some(payload)) => {
                match self.backend.push_results(&current, payload.as_bytes()).await {
                    Ok(()) => Verdict::Delivered { item: current },
                    Err(err) if err.is_transient() => Verdict::Retry {
                        item: current,
                        kind: RetryKind::BackendUnavailable,
                    },
                    Err(err) => Verdict::Failed {
                        item: current,
                        error: err.into(),
                    },
                }
            }
            Err(err) => Verdict::Failed {
                item: current,
                error: err.into(),
            },
        }
    }

    /// Apply a verdict to the queue
    async fn apply(
        &self,
        verdict: Verdict,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), QueueError> {
        match verdict {
            Verdict::Delivered { item } => {
                let _ = self.queue.pop()?;
                self.run_cleanup(&item).await;
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!("scan results delivered for {}", item.key());
            }
            Verdict::NotRelevant => {
                let _ = self.queue.pop()?;
                self.stats.not_relevant.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Failed { item, error } => {
                let _ = self.queue.pop()?;
                self.run_cleanup(&item).await;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("delivery failed permanently for {}: {error}", item.key());
            }
            Verdict::Retry { item, kind } => {
                if kind == RetryKind::BackendUnavailable {
                    // Breathe before requeueing; interrupted by shutdown the
                    // item simply stays at the head.
                    if wait(self.config.retry_backoff, shutdown).await {
                        return Ok(());
                    }
                }

                if item.is_expired(Utc::now()) {
                    let _ = self.queue.pop()?;
                    self.run_cleanup(&item).await;
                    self.stats.expired.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "{} exceeded its {}s queue timeout, dropping",
                        item.key(),
                        item.timeout.as_secs()
                    );
                    return Ok(());
                }

                self.queue.requeue(item)?;
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
                let _ = wait(self.config.skip_interval, shutdown).await;
            }
        }
        Ok(())
    }

    async fn run_cleanup(&self, item: &QueueItem) {
        if let Some(adapter) = self.registry.get(&item.tool) {
            adapter.cleanup(item).await;
        }
    }
}

/// Sleep for `duration`, returning true if shutdown fired first
async fn wait(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}
