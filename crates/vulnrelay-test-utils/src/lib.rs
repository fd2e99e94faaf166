//! Testing utilities for the vulnrelay workspace
//!
//! Instrumented fakes for the backend client and scan adapters, plus small
//! async test helpers. Consumed as a dev-dependency by the other crates'
//! integration tests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use vulnrelay_client::{BackendClient, BackendError, PreflightApproval};
use vulnrelay_core::{AdapterError, ScanAdapter, ScanPayload};
use vulnrelay_queue::QueueItem;

/// Scripted outcome of one preflight call
#[derive(Debug, Clone)]
pub enum PreflightStep {
    /// Backend confirms interest, optionally with a baseline
    Relevant(Option<DateTime<Utc>>),
    /// Backend has no interest in the build
    NotRelevant,
    /// 502/503 from the backend
    Unavailable,
    /// Non-retryable rejection
    Rejected,
}

/// Scripted outcome of one push call
#[derive(Debug, Clone)]
pub enum PushStep {
    /// HTTP 202
    Accepted,
    /// 502/503 from the backend
    Unavailable,
    /// Non-retryable rejection
    Rejected,
}

/// Instrumented backend fake
///
/// Scripted steps are consumed in order; once a script runs out the fake
/// answers `Relevant(None)` / `Accepted`. Call counts and delivered payloads
/// are recorded for assertions.
#[derive(Debug, Default)]
pub struct FakeBackend {
    preflight_script: Mutex<VecDeque<PreflightStep>>,
    push_script: Mutex<VecDeque<PushStep>>,
    preflight_calls: AtomicUsize,
    push_calls: AtomicUsize,
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_preflight(&self, steps: impl IntoIterator<Item = PreflightStep>) {
        self.preflight_script.lock().extend(steps);
    }

    pub fn script_push(&self, steps: impl IntoIterator<Item = PushStep>) {
        self.push_script.lock().extend(steps);
    }

    pub fn preflight_calls(&self) -> usize {
        self.preflight_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Delivered payloads as `(item key, bytes)` pairs, in delivery order
    pub fn delivered(&self) -> Vec<(String, Vec<u8>)> {
        self.delivered.lock().clone()
    }
}

#[async_trait::async_trait]
impl BackendClient for FakeBackend {
    async fn preflight(
        &self,
        _job_id: &str,
        _build_id: &str,
    ) -> Result<Option<PreflightApproval>, BackendError> {
        self.preflight_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .preflight_script
            .lock()
            .pop_front()
            .unwrap_or(PreflightStep::Relevant(None));
        match step {
            PreflightStep::Relevant(baseline) => Ok(Some(PreflightApproval { baseline })),
            PreflightStep::NotRelevant => Ok(None),
            PreflightStep::Unavailable => Err(BackendError::Unavailable { status: 503 }),
            PreflightStep::Rejected => Err(BackendError::Rejected { status: 400 }),
        }
    }

    async fn push_results(&self, item: &QueueItem, payload: &[u8]) -> Result<(), BackendError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .push_script
            .lock()
            .pop_front()
            .unwrap_or(PushStep::Accepted);
        match step {
            PushStep::Accepted => {
                self.delivered.lock().push((item.key(), payload.to_vec()));
                Ok(())
            }
            PushStep::Unavailable => Err(BackendError::Unavailable { status: 503 }),
            PushStep::Rejected => Err(BackendError::Rejected { status: 500 }),
        }
    }
}

/// Instrumented scan adapter fake
///
/// Reports "not ready" for a configured number of fetches, then serves a
/// fixed payload (or a permanent error). Records fetch/cleanup counts and
/// the baseline it last saw.
#[derive(Debug)]
pub struct FakeAdapter {
    payload: Vec<u8>,
    not_ready_rounds: AtomicUsize,
    fail: bool,
    fetch_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    last_baseline: Mutex<Option<DateTime<Utc>>>,
}

impl FakeAdapter {
    /// Adapter whose results are ready on the first fetch
    pub fn ready(payload: impl Into<Vec<u8>>) -> Self {
        Self::ready_after(0, payload)
    }

    /// Adapter that answers "not ready" `rounds` times before serving
    pub fn ready_after(rounds: usize, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            not_ready_rounds: AtomicUsize::new(rounds),
            fail: false,
            fetch_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            last_baseline: Mutex::new(None),
        }
    }

    /// Adapter whose every fetch fails permanently
    pub fn failing() -> Self {
        Self {
            payload: Vec::new(),
            not_ready_rounds: AtomicUsize::new(0),
            fail: true,
            fetch_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            last_baseline: Mutex::new(None),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    /// Baseline carried by the most recently fetched item
    pub fn last_baseline(&self) -> Option<DateTime<Utc>> {
        *self.last_baseline.lock()
    }
}

#[async_trait::async_trait]
impl ScanAdapter for FakeAdapter {
    async fn fetch_results(&self, item: &QueueItem) -> Result<Option<ScanPayload>, AdapterError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_baseline.lock() = item.baseline;

        if self.fail {
            return Err(AdapterError::Retrieval("scan backend exploded".to_string()));
        }

        let remaining = self.not_ready_rounds.load(Ordering::SeqCst);
        if remaining > 0 {
            self.not_ready_rounds.store(remaining - 1, Ordering::SeqCst);
            return Ok(None);
        }

        Ok(Some(ScanPayload::new(self.payload.clone())))
    }

    async fn cleanup(&self, _item: &QueueItem) {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
