//! Distributed cache for the Stratum runtime.
//!
//! The cache is an acceleration layer, never a correctness dependency:
//! backend unavailability degrades reads to the producer and is invisible to
//! callers. [`CacheStore`] provides TTL'd key/value operations, a
//! read-through helper, and an advisory, lease-based lock.
//!
//! Two backends ship in-tree: [`MemoryBackend`] for tests and local
//! development, and [`RespBackend`] speaking the Redis wire protocol over
//! asupersync TCP.

pub mod memory;
pub mod resp;
pub mod store;

pub use memory::MemoryBackend;
pub use resp::RespBackend;
pub use store::{CacheBackend, CacheStore, sanitize_key};
