//! Record collections backed by a Git provider.
//!
//! A collection maps CRUD calls on records to reads and commits:
//!
//! - [`JsonFileCollection`] - all records in one JSON array file
//! - [`JsonDirectoryCollection`] - one JSON file per record
//! - [`RawFileCollection`] - binary files exposed as data-URL records
//! - [`BranchCollection`] / [`CommitCollection`] - read-only views of the
//!   repository itself
//! - [`PipelineCollection`] - read-only CI pipelines of a branch
//!
//! Reads go through the branch-state cache. Mutations are queued per
//! collection, read the current state uncached, and commit once.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::caches::InvalidationStrategy;
use crate::provider::ProviderError;
use crate::records::{
    default_filter_records, CodecError, JsonCodec, ListOutput, ListQuery, Record, RecordCodec,
};

mod directory_collection;
mod file_collection;
mod mutation_queue;
mod pipeline_collection;
mod raw_file_collection;
mod read_only;
mod resources;

pub use directory_collection::JsonDirectoryCollection;
pub use file_collection::JsonFileCollection;
pub use mutation_queue::MutationQueue;
pub use pipeline_collection::PipelineCollection;
pub use raw_file_collection::RawFileCollection;
pub use read_only::{BranchCollection, CommitCollection};
pub use resources::Resources;

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by collection operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectionError {
    /// The collection does not support the operation.
    #[error("Not available: {0}")]
    NotAvailable(&'static str),

    /// No record has the given id.
    #[error("record {0} not found")]
    NotFound(String),

    /// The provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Stored content could not be decoded, or a record could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The caller supplied unusable data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;

// =============================================================================
// RecordCollection Trait
// =============================================================================

/// CRUD access to one resource's records.
#[async_trait]
pub trait RecordCollection: Send + Sync {
    /// One page of the records matching `query`.
    async fn list(&self, query: &ListQuery) -> Result<ListOutput>;

    async fn get_one(&self, id: &str) -> Result<Option<Record>>;

    /// The records among `ids` that exist. Missing ids are skipped.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>>;

    /// Records whose `target` field equals `id`, further narrowed by `query`.
    async fn get_many_reference(
        &self,
        target: &str,
        id: &str,
        query: &ListQuery,
    ) -> Result<ListOutput> {
        let mut filter = Map::new();
        filter.insert(target.to_string(), Value::String(id.to_string()));
        filter.extend(query.filter.clone());
        let query = ListQuery {
            filter,
            ..query.clone()
        };
        self.list(&query).await
    }

    /// Store a new record and return it with its assigned id.
    async fn create(&self, data: Record) -> Result<Record>;

    /// Replace the record `id` with `data`.
    async fn update(&self, id: &str, data: Record) -> Result<Record>;

    /// Merge `data` into every record among `ids`.
    async fn update_many(&self, ids: &[String], data: Record) -> Result<Vec<Record>>;

    /// Remove the record `id` and return what was stored.
    async fn delete(&self, id: &str) -> Result<Record>;

    /// Remove the records among `ids`; returns the requested ids.
    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>>;
}

// =============================================================================
// CollectionOptions
// =============================================================================

/// Rewrites an error before it reaches the caller.
pub type ErrorTransform = Arc<dyn Fn(CollectionError) -> CollectionError + Send + Sync>;

/// Rewrites a record before it is written.
pub type RecordTransform = Arc<dyn Fn(Record) -> Record + Send + Sync>;

/// Applies a list query's filter object.
pub type RecordFilter = Arc<dyn Fn(Vec<Record>, &Map<String, Value>) -> Vec<Record> + Send + Sync>;

/// Produces ids for created records.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Where a collection lives and how it behaves.
#[derive(Clone)]
pub struct CollectionOptions {
    /// File (or directory) path in the repository.
    pub path: String,
    /// Branch the collection reads and commits to.
    pub git_ref: String,
    pub codec: Arc<dyn RecordCodec>,
    /// How cached listings are revalidated.
    pub strategy: InvalidationStrategy,
    pub error_transform: ErrorTransform,
    pub record_transform: RecordTransform,
    pub record_filter: RecordFilter,
    pub id_generator: IdGenerator,
}

impl CollectionOptions {
    /// Options for `path` on `main` with JSON files and default hooks.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into().trim_matches('/').to_string(),
            git_ref: "main".to_string(),
            codec: Arc::new(JsonCodec::default()),
            strategy: InvalidationStrategy::Branch,
            error_transform: Arc::new(|e: CollectionError| e),
            record_transform: Arc::new(|r: Record| r),
            record_filter: Arc::new(default_filter_records),
            id_generator: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = git_ref.into();
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_error_transform(
        mut self,
        f: impl Fn(CollectionError) -> CollectionError + Send + Sync + 'static,
    ) -> Self {
        self.error_transform = Arc::new(f);
        self
    }

    pub fn with_record_transform(mut self, f: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        self.record_transform = Arc::new(f);
        self
    }

    pub fn with_record_filter(
        mut self,
        f: impl Fn(Vec<Record>, &Map<String, Value>) -> Vec<Record> + Send + Sync + 'static,
    ) -> Self {
        self.record_filter = Arc::new(f);
        self
    }

    pub fn with_id_generator(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Arc::new(f);
        self
    }

    pub(crate) fn patch_error(&self, error: CollectionError) -> CollectionError {
        (self.error_transform)(error)
    }

    pub(crate) fn transform(&self, record: Record) -> Record {
        (self.record_transform)(record)
    }

    pub(crate) fn generate_id(&self) -> String {
        (self.id_generator)()
    }

    /// Sort, filter and paginate with this collection's filter hook.
    pub(crate) fn apply_query(&self, records: Vec<Record>, query: &ListQuery) -> ListOutput {
        crate::records::apply_query(records, query, |records, filter| {
            (self.record_filter)(records, filter)
        })
    }

    /// Full path of a file inside the collection directory.
    pub(crate) fn file_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }
}

impl std::fmt::Debug for CollectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("path", &self.path)
            .field("git_ref", &self.git_ref)
            .field("strategy", &self.strategy)
            .finish()
    }
}
