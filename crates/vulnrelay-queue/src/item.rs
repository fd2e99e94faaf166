//! Queue item model
//!
//! A `QueueItem` is one finished build whose scan results still have to be
//! fetched from the security tool and pushed to the backend. Items are
//! immutable snapshots: processing stages produce an updated copy (see
//! [`QueueItem::approved`]) instead of mutating shared state, so the worker
//! loop stays a pure reducer over (item, stage outcome).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Identifier of the security tool that produced (or will produce) the scan
///
/// Keys the adapter registry. Free-form so SDK hosts can register their own
/// tool integrations alongside the built-in ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolType(String);

impl ToolType {
    /// Create a tool type from its registry key
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Registry key as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToolType {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Producer-side request to deliver a build's scan results
///
/// Built by the CI plugin when a build finishes; the service turns it into a
/// [`QueueItem`] at enqueue time.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// CI job identifier
    pub job_id: String,
    /// Build identifier within the job
    pub build_id: String,
    /// Security tool expected to hold the results
    pub tool: ToolType,
    /// How long the item may stay in the queue before it is dropped;
    /// falls back to the service default when `None`
    pub timeout: Option<Duration>,
    /// Tool-specific properties (server URL, project version, ...)
    pub properties: HashMap<String, String>,
}

impl ScanRequest {
    /// Create a request for a finished build
    #[inline]
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        build_id: impl Into<String>,
        tool: impl Into<ToolType>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            build_id: build_id.into(),
            tool: tool.into(),
            timeout: None,
            properties: HashMap::new(),
        }
    }

    /// With an explicit queue timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// With a tool-specific property
    #[inline]
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One pending scan delivery
///
/// Identity is `(job_id, build_id)`. The item is removed from the queue only
/// on a terminal outcome: delivered, not relevant, permanent failure, or
/// timeout expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// CI job identifier
    pub job_id: String,
    /// Build identifier within the job
    pub build_id: String,
    /// Security tool expected to hold the results
    pub tool: ToolType,
    /// When the item entered the queue
    pub enqueued_at: DateTime<Utc>,
    /// Maximum age before the item is dropped instead of requeued
    pub timeout: Duration,
    /// Whether the backend confirmed interest in this build's results
    pub relevant: bool,
    /// Issues detected before this timestamp are excluded from delivery
    pub baseline: Option<DateTime<Utc>>,
    /// Tool-specific properties carried from the request
    pub properties: HashMap<String, String>,
}

impl QueueItem {
    /// Build an item from a producer request
    ///
    /// `default_timeout` applies when the request carries none. The item
    /// starts out not-relevant; the worker's preflight stage promotes it.
    #[must_use]
    pub fn from_request(request: ScanRequest, default_timeout: Duration) -> Self {
        Self {
            job_id: request.job_id,
            build_id: request.build_id,
            tool: request.tool,
            enqueued_at: Utc::now(),
            timeout: request.timeout.unwrap_or(default_timeout),
            relevant: false,
            baseline: None,
            properties: request.properties,
        }
    }

    /// Copy of this item marked relevant, with the backend's baseline
    ///
    /// The preflight stage returns this updated copy; the original stays
    /// untouched. Requeueing the copy is what makes relevance survive
    /// retries and restarts.
    #[must_use]
    pub fn approved(&self, baseline: Option<DateTime<Utc>>) -> Self {
        Self {
            relevant: true,
            baseline,
            ..self.clone()
        }
    }

    /// Age of the item relative to `now`
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.enqueued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the item has outlived its timeout
    ///
    /// Expired items are dropped instead of requeued.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.timeout
    }

    /// Stable `(job_id, build_id)` identity, used in logs
    #[inline]
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}#{}", self.job_id, self.build_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn request() -> ScanRequest {
        ScanRequest::new("job-a", "17", "ssc").with_property("server", "https://ssc.local")
    }

    #[test]
    fn item_from_request_defaults() {
        let item = QueueItem::from_request(request(), Duration::from_secs(60));

        assert_eq!(item.job_id, "job-a");
        assert_eq!(item.build_id, "17");
        assert_eq!(item.tool.as_str(), "ssc");
        assert_eq!(item.timeout, Duration::from_secs(60));
        assert!(!item.relevant);
        assert!(item.baseline.is_none());
        assert_eq!(item.properties["server"], "https://ssc.local");
    }

    #[test]
    fn request_timeout_overrides_default() {
        let req = request().with_timeout(Duration::from_secs(5));
        let item = QueueItem::from_request(req, Duration::from_secs(60));
        assert_eq!(item.timeout, Duration::from_secs(5));
    }

    #[test]
    fn approved_copy_leaves_original_untouched() {
        let item = QueueItem::from_request(request(), Duration::from_secs(60));
        let baseline = Utc::now();

        let approved = item.approved(Some(baseline));

        assert!(!item.relevant);
        assert!(approved.relevant);
        assert_eq!(approved.baseline, Some(baseline));
        assert_eq!(approved.key(), item.key());
    }

    #[test]
    fn expiry_follows_age_against_timeout() {
        let mut item = QueueItem::from_request(request(), Duration::from_secs(10));
        let now = Utc::now();

        assert!(!item.is_expired(now));

        item.enqueued_at = now - TimeDelta::seconds(11);
        assert!(item.is_expired(now));

        // Exactly at the limit counts as expired.
        item.enqueued_at = now - TimeDelta::seconds(10);
        assert!(item.is_expired(now));
    }

    #[test]
    fn item_serde_round_trip() {
        let item = QueueItem::from_request(request(), Duration::from_secs(60))
            .approved(Some(Utc::now()));

        let encoded = serde_json::to_string(&item).unwrap();
        let decoded: QueueItem = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, item);
    }
}
