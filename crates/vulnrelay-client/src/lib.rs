//! Backend client for vulnrelay
//!
//! Two concerns live here:
//! - the [`BackendClient`] trait the delivery worker talks through
//!   (preflight relevance checks, pushing serialized results)
//! - [`HttpBackend`], the reqwest implementation against the ALM backend's
//!   REST API
//!
//! Error classification is the contract that matters: only a 502/503 from
//! the backend is transient (retry-eligible); every other failure is
//! permanent so one poisoned item can never block the queue.

pub mod backend;
pub mod http;

pub use backend::{BackendClient, BackendError, PreflightApproval};
pub use http::HttpBackend;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
