//! Durable FIFO queue of pending vulnerability scan deliveries
//!
//! Provides the queue item model and a durable store:
//! - `QueueItem` snapshots (one per finished build awaiting delivery)
//! - `DeliveryQueue` with an optional append-only file log
//! - Replay and compaction across process restarts
//!
//! The queue supports concurrent producers (arbitrary CI threads reporting
//! build completion) and a single consumer that peeks and pops the head.

pub mod error;
pub mod item;
pub mod store;

pub use error::QueueError;
pub use item::{QueueItem, ScanRequest, ToolType};
pub use store::DeliveryQueue;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
