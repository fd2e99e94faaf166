//! vulnrelay Core - Vulnerability Scan Delivery Service
//!
//! The service that CI-server plugins embed:
//! - Accepts "build finished, scan results may exist" notifications
//! - Queues them durably and processes them with a single worker
//! - Asks the backend whether each build is relevant (preflight)
//! - Pulls serialized results from the registered tool adapter
//! - Pushes them to the backend with bounded retry
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vulnrelay_client::HttpBackend;
//! use vulnrelay_core::{AdapterRegistry, DeliveryConfig, DeliveryService};
//! use vulnrelay_queue::{DeliveryQueue, ScanRequest};
//!
//! let registry = AdapterRegistry::new().with_adapter("ssc", my_ssc_adapter);
//! let queue = DeliveryQueue::open("/var/lib/ci/vulnrelay", 512)?;
//! let backend = Arc::new(HttpBackend::new("https://alm.example.com/api"));
//!
//! let service = DeliveryService::start(DeliveryConfig::new(), queue, registry, backend);
//! service.enqueue(ScanRequest::new("job-a", "17", "ssc"))?;
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod service;
mod worker;

pub use adapter::{AdapterError, AdapterRegistry, ScanAdapter, ScanPayload};
pub use config::DeliveryConfig;
pub use error::DeliveryError;
pub use service::{DeliveryService, DeliveryStats};

// Re-exports for convenience
pub use vulnrelay_client::{BackendClient, BackendError, PreflightApproval};
pub use vulnrelay_queue::{DeliveryQueue, QueueItem, ScanRequest, ToolType};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
