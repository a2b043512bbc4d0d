use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::git_provider::{
    BranchHead, CommitAction, CommitInfo, FileContent, FileMetadata, GitProvider, PipelineInfo,
    PipelineSummary, ProviderError, Result, TreeEntry,
};

/// Default bound on a single provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Bounds every call of the wrapped provider.
///
/// A call that overruns fails with [`ProviderError::Timeout`]; nothing is
/// retried.
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: Duration,
}

impl<P: GitProvider> TimeoutProvider<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl<P: GitProvider> GitProvider for TimeoutProvider<P> {
    async fn branch_head(&self, git_ref: &str) -> Result<Option<BranchHead>> {
        self.bounded(self.inner.branch_head(git_ref)).await
    }

    async fn list_tree(&self, path: &str, git_ref: &str) -> Result<Vec<TreeEntry>> {
        self.bounded(self.inner.list_tree(path, git_ref)).await
    }

    async fn read_file(&self, path: &str, git_ref: &str) -> Result<Option<FileContent>> {
        self.bounded(self.inner.read_file(path, git_ref)).await
    }

    async fn file_metadata(&self, path: &str, git_ref: &str) -> Result<Option<FileMetadata>> {
        self.bounded(self.inner.file_metadata(path, git_ref)).await
    }

    async fn commit(&self, git_ref: &str, message: &str, actions: &[CommitAction]) -> Result<()> {
        self.bounded(self.inner.commit(git_ref, message, actions))
            .await
    }

    async fn list_branches(&self) -> Result<Vec<BranchHead>> {
        self.bounded(self.inner.list_branches()).await
    }

    async fn list_commits(&self, git_ref: &str) -> Result<Vec<CommitInfo>> {
        self.bounded(self.inner.list_commits(git_ref)).await
    }

    async fn list_pipelines(&self, git_ref: &str) -> Result<Vec<PipelineSummary>> {
        self.bounded(self.inner.list_pipelines(git_ref)).await
    }

    async fn pipeline(&self, id: &str) -> Result<Option<PipelineInfo>> {
        self.bounded(self.inner.pipeline(id)).await
    }
}
