//! Configuration types for gitrecords.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::caches::InvalidationStrategy;

// =============================================================================
// Cache Configuration
// =============================================================================

/// Where cached listings and file reads are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// Bounded in-process LRU, lost on exit.
    #[default]
    Memory,
    /// LMDB environment under `CacheConfig::path`.
    Lmdb,
}

impl CacheBackend {
    pub fn name(&self) -> &'static str {
        match self {
            CacheBackend::Memory => "memory",
            CacheBackend::Lmdb => "lmdb",
        }
    }
}

/// Configuration for the local record cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for the LMDB environment.
    pub path: PathBuf,
    /// If true, every read goes to the provider.
    pub no_cache: bool,
    pub backend: CacheBackend,
    /// Capacity of each in-memory cache.
    pub max_entries: usize,
}

// =============================================================================
// Network Configuration
// =============================================================================

/// Limits applied to provider calls.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Number of file reads allowed to run at once.
    pub max_concurrent_requests: usize,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

// =============================================================================
// Repository Configuration
// =============================================================================

/// The repository the records live in.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Working tree root for the filesystem provider.
    pub root: PathBuf,
    /// Branch used by collections that do not name their own.
    pub git_ref: String,
}

// =============================================================================
// Collection Configuration
// =============================================================================

/// How a collection lays its records out in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    /// All records in one JSON array file.
    #[default]
    File,
    /// One JSON file per record.
    Directory,
    /// Arbitrary files exposed as data-URL records.
    Raw,
}

/// Configuration for a single `[collection.NAME]` section.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    /// File or directory path within the repository.
    pub path: String,
    pub kind: CollectionKind,
    /// Branch override; falls back to `RepositoryConfig::git_ref`.
    pub git_ref: Option<String>,
    pub cache_behavior: InvalidationStrategy,
    /// JSON indent width; 0 writes compact JSON.
    pub indent: usize,
}

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The complete application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub repository: RepositoryConfig,
    /// Collections by resource name.
    pub collections: BTreeMap<String, CollectionConfig>,
}

impl Config {
    /// The branch a collection reads and commits to.
    pub fn collection_ref<'a>(&'a self, collection: &'a CollectionConfig) -> &'a str {
        collection
            .git_ref
            .as_deref()
            .unwrap_or(&self.repository.git_ref)
    }
}
