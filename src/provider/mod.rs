//! Git-hosting provider access.
//!
//! [`GitProvider`] is the only way the record layer talks to a repository.
//! Three implementations are provided:
//!
//! - [`MemoryProvider`] - an in-process repository with commit history
//! - [`FsProvider`] - a local directory served as a single branch
//! - [`TimeoutProvider`] - bounds the calls of any other provider

mod fs_provider;
mod git_provider;
mod memory_provider;
mod timeout_provider;

pub use fs_provider::FsProvider;
pub use git_provider::{
    BranchHead, CommitAction, CommitActionKind, CommitInfo, Encoding, FileContent, FileMetadata,
    Fingerprint, GitProvider, PipelineInfo, PipelineSummary, ProviderError, Result, TreeEntry,
    TreeEntryKind,
};
pub use memory_provider::{CallCounts, MemoryProvider};
pub use timeout_provider::{TimeoutProvider, DEFAULT_TIMEOUT};
