//! Error types for the delivery service

use crate::adapter::AdapterError;
use vulnrelay_client::BackendError;
use vulnrelay_queue::{QueueError, ToolType};

/// Delivery service errors
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Durable queue operation failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Backend call failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Adapter could not produce results
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// No adapter registered for the requested tool (configuration error)
    #[error("no adapter registered for tool: {0}")]
    UnknownTool(ToolType),
}

impl DeliveryError {
    /// Whether the error is retry-eligible
    ///
    /// Only a temporarily unavailable backend qualifies; adapter errors,
    /// rejected pushes and configuration errors are permanent.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(err) if err.is_transient())
    }
}
