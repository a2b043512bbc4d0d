//! The remote Git-provider interface consumed by the record layer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An opaque comparable identifier (commit id, blob id, content hash).
pub type Fingerprint = String;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by a [`GitProvider`].
///
/// Cloneable so one failed read can be handed to every coalesced caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The path or ref does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The commit conflicts with the current branch contents.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The call did not finish within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider does not implement this call.
    #[error("operation not supported by this provider: {0}")]
    Unsupported(&'static str),

    /// The path is not acceptable to the provider.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Any other remote failure.
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::Io(e.to_string())
    }
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

// =============================================================================
// Branches and Commits
// =============================================================================

/// The last known tip of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchHead {
    pub name: String,
    pub head_fingerprint: Fingerprint,
}

/// One entry of a commit history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: Fingerprint,
    pub message: String,
    pub parent: Option<Fingerprint>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a pipeline listing: enough to tell whether a cached
/// [`PipelineInfo`] is still current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: String,
    /// Commit the pipeline ran against.
    pub sha: Fingerprint,
}

/// A CI pipeline run, as returned by a single-pipeline lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: String,
    pub sha: Fingerprint,
    pub status: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Trees and Files
// =============================================================================

/// Whether a tree entry is a file or a subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    Blob,
    Tree,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub kind: TreeEntryKind,
    /// Blob id for files, tree id for directories.
    pub entry_id: Fingerprint,
    /// Full path from the repository root.
    pub path: String,
}

impl TreeEntry {
    pub fn blob(entry_id: impl Into<Fingerprint>, path: impl Into<String>) -> Self {
        Self {
            kind: TreeEntryKind::Blob,
            entry_id: entry_id.into(),
            path: path.into(),
        }
    }

    pub fn tree(entry_id: impl Into<Fingerprint>, path: impl Into<String>) -> Self {
        Self {
            kind: TreeEntryKind::Tree,
            entry_id: entry_id.into(),
            path: path.into(),
        }
    }

    pub fn is_blob(&self) -> bool {
        self.kind == TreeEntryKind::Blob
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// How file content travels to and from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Text,
    Base64,
}

/// A file read from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    /// Blob id of the content; matches the `entry_id` of its tree entry.
    pub content_fingerprint: Fingerprint,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
}

/// Lightweight file information obtained without the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub content_fingerprint: Fingerprint,
}

// =============================================================================
// Commit Actions
// =============================================================================

/// The kind of file change in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitActionKind {
    Create,
    Update,
    Delete,
    Move,
}

/// One atomic file-level change submitted as part of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAction {
    pub kind: CommitActionKind,
    pub path: String,
    /// Source path for [`CommitActionKind::Move`].
    pub previous_path: Option<String>,
    /// New content; required for create and update, optional for move.
    pub content: Option<Vec<u8>>,
    pub encoding: Encoding,
}

impl CommitAction {
    pub fn create(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            kind: CommitActionKind::Create,
            path: path.into(),
            previous_path: None,
            content: Some(content),
            encoding: Encoding::Text,
        }
    }

    pub fn update(path: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            kind: CommitActionKind::Update,
            path: path.into(),
            previous_path: None,
            content: Some(content),
            encoding: Encoding::Text,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: CommitActionKind::Delete,
            path: path.into(),
            previous_path: None,
            content: None,
            encoding: Encoding::Text,
        }
    }

    pub fn move_file(previous_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: CommitActionKind::Move,
            path: path.into(),
            previous_path: Some(previous_path.into()),
            content: None,
            encoding: Encoding::Text,
        }
    }

    /// Mark the content as binary, to be sent base64-encoded.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

// =============================================================================
// GitProvider Trait
// =============================================================================

/// Access to a Git-hosted repository.
///
/// All calls are asynchronous; `ref` names a branch. Implementations decide
/// their own retry policy; callers above this trait never retry.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Current head of a branch, or `None` if the branch does not exist.
    async fn branch_head(&self, git_ref: &str) -> Result<Option<BranchHead>>;

    /// Direct children of the directory at `path`. A missing directory lists
    /// as empty.
    async fn list_tree(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>>;

    /// Read a file, or `None` if it does not exist.
    async fn read_file(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>>;

    /// Content fingerprint of a file without its body.
    async fn file_metadata(&self, path: &str, git_ref: &str) -> Result<Option<FileMetadata>>;

    /// Apply all actions atomically as one commit on `git_ref`.
    async fn commit(&self, git_ref: &str, message: &str, actions: &[CommitAction]) -> Result<()>;

    /// All branches of the repository.
    async fn list_branches(&self) -> Result<Vec<BranchHead>> {
        Err(ProviderError::Unsupported("list_branches"))
    }

    /// Commit history of `git_ref`, newest first.
    async fn list_commits(&self, _git_ref: &str) -> Result<Vec<CommitInfo>> {
        Err(ProviderError::Unsupported("list_commits"))
    }

    /// CI pipelines that ran on `git_ref`, newest first.
    async fn list_pipelines(&self, _git_ref: &str) -> Result<Vec<PipelineSummary>> {
        Err(ProviderError::Unsupported("list_pipelines"))
    }

    /// One CI pipeline, or `None` if it does not exist.
    async fn pipeline(&self, _id: &str) -> Result<Option<PipelineInfo>> {
        Err(ProviderError::Unsupported("pipeline"))
    }
}

#[async_trait]
impl<T: GitProvider + ?Sized> GitProvider for std::sync::Arc<T> {
    async fn branch_head(&self, git_ref: &str) -> Result<Option<BranchHead>> {
        (**self).branch_head(git_ref).await
    }

    async fn list_tree(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        (**self).list_tree(path, git_ref).await
    }

    async fn read_file(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        (**self).read_file(path, git_ref).await
    }

    async fn file_metadata(&self, path: &str, git_ref: &str) -> Result<Option<FileMetadata>> {
        (**self).file_metadata(path, git_ref).await
    }

    async fn commit(&self, git_ref: &str, message: &str, actions: &[CommitAction]) -> Result<()> {
        (**self).commit(git_ref, message, actions).await
    }

    async fn list_branches(&self) -> Result<Vec<BranchHead>> {
        (**self).list_branches().await
    }

    async fn list_commits(&self, git_ref: &str) -> Result<Vec<CommitInfo>> {
        (**self).list_commits(git_ref).await
    }

    async fn list_pipelines(&self, git_ref: &str) -> Result<Vec<PipelineSummary>> {
        (**self).list_pipelines(git_ref).await
    }

    async fn pipeline(&self, id: &str) -> Result<Option<PipelineInfo>> {
        (**self).pipeline(id).await
    }
}

/// Serde adapter storing bytes as a base64 string.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_content_json_uses_base64() {
        let file = FileContent {
            path: "data/a.json".to_string(),
            content_fingerprint: "b1".to_string(),
            bytes: vec![0, 159, 146, 150],
            encoding: Encoding::Text,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["bytes"], "AJ+Slg==");

        let back: FileContent = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn test_tree_entry_name() {
        assert_eq!(TreeEntry::blob("x", "data/users/3.json").name(), "3.json");
        assert_eq!(TreeEntry::tree("y", "top").name(), "top");
    }
}
