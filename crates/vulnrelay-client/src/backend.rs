//! Backend client trait and error classification

use chrono::{DateTime, Utc};
use vulnrelay_queue::QueueItem;

/// Backend's answer to a preflight relevance check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightApproval {
    /// Issues detected before this timestamp should be excluded from
    /// delivery (avoids re-reporting historical findings)
    pub baseline: Option<DateTime<Utc>>,
}

/// Backend call failures
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Backend is temporarily unavailable (502/503); retry-eligible
    #[error("backend temporarily unavailable (status {status})")]
    Unavailable { status: u16 },

    /// Backend rejected the request; not retryable
    #[error("backend rejected the request (status {status})")]
    Rejected { status: u16 },

    /// Transport-level failure. Classified permanent: only an explicit
    /// 502/503 counts as transient, everything unexpected fails safe.
    #[error("backend transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the failure is retry-eligible
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Client the delivery worker talks to the backend through
///
/// Implemented by [`crate::HttpBackend`] for production and by test fakes
/// in integration tests.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    /// Ask whether the backend wants this build's scan results
    ///
    /// `Ok(None)` means the backend has no opinion or the build is not
    /// relevant; the item should be silently dropped. `Ok(Some(approval))`
    /// confirms interest, optionally with a baseline timestamp.
    ///
    /// # Errors
    /// `BackendError::Unavailable` when the backend cannot answer right now;
    /// any other error is permanent for the item.
    async fn preflight(
        &self,
        job_id: &str,
        build_id: &str,
    ) -> Result<Option<PreflightApproval>, BackendError>;

    /// Push serialized scan results for an item
    ///
    /// # Errors
    /// `BackendError::Unavailable` when the backend cannot accept right now;
    /// any other error is permanent for the item.
    async fn push_results(&self, item: &QueueItem, payload: &[u8]) -> Result<(), BackendError>;
}
