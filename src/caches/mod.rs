//! Caches for records fetched from a Git provider.
//!
//! ## Architecture
//!
//! The cache system is layered:
//!
//! 1. **KeyValueCache** - JSON values under string keys
//!    - [`NoopKeyValueCache`] - caches nothing
//!    - [`MemoryKeyValueCache`] - in-memory LRU
//!    - [`LmdbKeyValueCache`] - LMDB-backed, one named database per cache
//!
//! 2. **CacheHandle / CacheRegistry** - typed, failure-tolerant access to a
//!    named cache
//!
//! 3. **get_or_set** - reuse a cached value or compute it, optionally
//!    checking the cached value first
//!
//! 4. **BranchStateCache** - listings validated against the branch head or a
//!    file's content hash, and file bodies validated against blob ids

mod branch_state_cache;
mod get_or_set;
mod key_value_cache;
mod lmdb_cache;
mod memory_cache;
mod registry;

pub use branch_state_cache::{BranchStateCache, InvalidationStrategy};
pub use get_or_set::{get_or_set, get_or_set_validated};
pub use key_value_cache::{CacheError, CacheHandle, KeyValueCache, NoopKeyValueCache, Result};
pub use lmdb_cache::{LmdbCacheEnv, LmdbKeyValueCache};
pub use memory_cache::{MemoryKeyValueCache, DEFAULT_MAX_ENTRIES};
pub use registry::CacheRegistry;
