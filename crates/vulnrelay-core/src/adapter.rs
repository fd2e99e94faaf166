//! Scan adapters
//!
//! An adapter knows how to pull finished scan results out of one security
//! tool (SSC, SonarQube, ...) and serialize them for delivery. The registry
//! is injected into the service at construction time; there is no global
//! adapter table.

use dashmap::DashMap;
use std::sync::Arc;
use vulnrelay_queue::{QueueItem, ToolType};

/// Serialized scan results ready to push to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    bytes: Vec<u8>,
}

impl ScanPayload {
    /// Wrap serialized results
    #[inline]
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw bytes of the payload
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload size in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Adapter failures
///
/// All adapter errors are permanent for the item being processed; "results
/// not ready yet" is not an error, it is `Ok(None)` from
/// [`ScanAdapter::fetch_results`].
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The tool could not produce results for this build
    #[error("scan retrieval failed: {0}")]
    Retrieval(String),

    /// Results were produced but could not be serialized
    #[error("scan serialization failed: {0}")]
    Serialization(String),
}

/// Tool-specific retrieval of scan results
#[async_trait::async_trait]
pub trait ScanAdapter: Send + Sync {
    /// Fetch serialized results for a queued build
    ///
    /// `Ok(None)` means the remote scan has not completed yet and the item
    /// should be retried later. `Ok(Some(payload))` is ready to push.
    /// The item's `baseline`, when set, tells the adapter to exclude issues
    /// detected before that timestamp.
    ///
    /// # Errors
    /// Any error is permanent for this item.
    async fn fetch_results(&self, item: &QueueItem) -> Result<Option<ScanPayload>, AdapterError>;

    /// Best-effort cleanup once an item reaches a terminal outcome
    ///
    /// Runs after delivery, permanent failure, or timeout expiry; adapters
    /// drop per-build scratch state here. Default is a no-op.
    async fn cleanup(&self, item: &QueueItem) {
        let _ = item;
    }
}

/// Lookup table from tool type to adapter
///
/// Built by the embedding host and handed to the service at construction
/// time. Processing an item whose tool has no adapter is a configuration
/// error, surfaced fail-fast at enqueue.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<ToolType, Arc<dyn ScanAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With an adapter registered for a tool (builder form)
    #[must_use]
    pub fn with_adapter(self, tool: impl Into<ToolType>, adapter: Arc<dyn ScanAdapter>) -> Self {
        self.register(tool, adapter);
        self
    }

    /// Register an adapter for a tool, replacing any previous one
    pub fn register(&self, tool: impl Into<ToolType>, adapter: Arc<dyn ScanAdapter>) {
        self.adapters.insert(tool.into(), adapter);
    }

    /// Adapter registered for a tool, if any
    #[must_use]
    pub fn get(&self, tool: &ToolType) -> Option<Arc<dyn ScanAdapter>> {
        self.adapters.get(tool).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a tool has a registered adapter
    #[must_use]
    pub fn contains(&self, tool: &ToolType) -> bool {
        self.adapters.contains_key(tool)
    }

    /// Number of registered adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tools: Vec<String> = self
            .adapters
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        f.debug_struct("AdapterRegistry").field("tools", &tools).finish()
    }
}
