//! gitrecords-rs - CRUD records stored as JSON files on a Git branch, with
//! branch-aware caching and serialized commits.

pub mod app;
pub mod caches;
pub mod cli;
pub mod collection;
pub mod config;
pub mod provider;
pub mod records;
pub mod util;

pub use collection::{CollectionError, RecordCollection, Resources};
pub use provider::{GitProvider, ProviderError};
pub use records::{ListOutput, ListQuery, Record};
