//! Reqwest implementation of the backend client
//!
//! Endpoints:
//! - `GET  {base}/jobs/{job}/builds/{build}/vulnerabilities/preflight`
//!   200 JSON `{ "relevant": bool, "baseline": epoch-millis|null }`,
//!   404 = not relevant, 502/503 = temporarily unavailable
//! - `POST {base}/vulnerabilities?job-id=..&build-id=..` with an
//!   `application/octet-stream` body, accepted with 202
//!
//! Status classification is kept in pure functions so the retry contract is
//! testable without a live server.

use crate::backend::{BackendClient, BackendError, PreflightApproval};
use chrono::DateTime;
use reqwest::StatusCode;
use serde::Deserialize;
use vulnrelay_queue::QueueItem;

/// HTTP client against the ALM backend REST API
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Create a client for the given base URL
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a client reusing an existing reqwest client
    ///
    /// The embedding host usually owns a configured client (proxies,
    /// timeouts); this constructor lets it be shared.
    #[must_use]
    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    fn preflight_url(&self, job_id: &str, build_id: &str) -> String {
        format!(
            "{}/jobs/{job_id}/builds/{build_id}/vulnerabilities/preflight",
            self.base_url
        )
    }

    fn push_url(&self) -> String {
        format!("{}/vulnerabilities", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct PreflightBody {
    relevant: bool,
    /// Epoch milliseconds; absent or null when the backend wants everything
    baseline: Option<i64>,
}

/// Turn a decoded preflight body into the worker-facing answer
fn approval_from_body(body: &PreflightBody) -> Option<PreflightApproval> {
    if !body.relevant {
        return None;
    }
    Some(PreflightApproval {
        baseline: body.baseline.and_then(DateTime::from_timestamp_millis),
    })
}

/// Classify a push response status against the retry contract
fn classify_push_status(status: StatusCode) -> Result<(), BackendError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        502 | 503 => Err(BackendError::Unavailable {
            status: status.as_u16(),
        }),
        other => Err(BackendError::Rejected { status: other }),
    }
}

#[async_trait::async_trait]
impl BackendClient for HttpBackend {
    async fn preflight(
        &self,
        job_id: &str,
        build_id: &str,
    ) -> Result<Option<PreflightApproval>, BackendError> {
        let url = self.preflight_url(job_id, build_id);
        tracing::debug!("preflight {url}");

        let response = self.http.get(&url).send().await?;
        match response.status().as_u16() {
            404 => Ok(None),
            502 | 503 => Err(BackendError::Unavailable {
                status: response.status().as_u16(),
            }),
            status if response.status().is_success() => {
                let body: PreflightBody = response
                    .json()
                    .await
                    .map_err(|e| BackendError::Decode(e.to_string()))?;
                tracing::debug!(
                    "preflight {job_id}#{build_id}: relevant={} (status {status})",
                    body.relevant
                );
                Ok(approval_from_body(&body))
            }
            other => Err(BackendError::Rejected { status: other }),
        }
    }

    async fn push_results(&self, item: &QueueItem, payload: &[u8]) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.push_url())
            .query(&[("job-id", &item.job_id), ("build-id", &item.build_id)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await?;

        let status = response.status();
        classify_push_status(status)?;
        tracing::info!(
            "delivered {} bytes of scan results for {} (status {status})",
            payload.len(),
            item.key()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn push_status_classification() {
        assert!(classify_push_status(StatusCode::ACCEPTED).is_ok());
        assert!(classify_push_status(StatusCode::OK).is_ok());

        let unavailable = classify_push_status(StatusCode::SERVICE_UNAVAILABLE).unwrap_err();
        assert!(unavailable.is_transient());
        let bad_gateway = classify_push_status(StatusCode::BAD_GATEWAY).unwrap_err();
        assert!(bad_gateway.is_transient());

        let rejected = classify_push_status(StatusCode::BAD_REQUEST).unwrap_err();
        assert!(!rejected.is_transient());
        assert!(matches!(rejected, BackendError::Rejected { status: 400 }));
    }

    #[test]
    fn preflight_body_decodes_baseline_millis() {
        let body: PreflightBody =
            serde_json::from_str(r#"{"relevant":true,"baseline":1700000000000}"#).unwrap();
        let approval = approval_from_body(&body).unwrap();
        assert_eq!(
            approval.baseline,
            Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
    }

    #[test]
    fn preflight_body_without_baseline() {
        let body: PreflightBody = serde_json::from_str(r#"{"relevant":true}"#).unwrap();
        let approval = approval_from_body(&body).unwrap();
        assert!(approval.baseline.is_none());
    }

    #[test]
    fn not_relevant_body_yields_none() {
        let body: PreflightBody =
            serde_json::from_str(r#"{"relevant":false,"baseline":null}"#).unwrap();
        assert!(approval_from_body(&body).is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("https://alm.example.com/api/");
        assert_eq!(
            backend.preflight_url("job-a", "17"),
            "https://alm.example.com/api/jobs/job-a/builds/17/vulnerabilities/preflight"
        );
    }
}
