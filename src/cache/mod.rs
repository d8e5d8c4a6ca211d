//! Cache storage for intercepted responses.
//!
//! This module provides:
//! - Versioned namespace naming (current vs stale namespaces)
//! - A storage trait with SQLite and in-memory backends
//! - A shared layer the lifecycle controller and router both use

mod layer;
mod memory;
mod registry;
mod served;
mod storage;

pub use layer::CacheLayer;
pub use memory::MemoryStorage;
pub use registry::{CacheNamespace, CacheRegistry};
pub use served::{ResponseSource, Served};
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
