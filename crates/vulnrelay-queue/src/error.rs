//! Error types for the delivery queue

/// Errors raised by the durable queue store
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Log file could not be read or written
    #[error("queue log io error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue record could not be encoded
    #[error("queue record encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
