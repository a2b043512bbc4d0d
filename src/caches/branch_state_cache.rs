//! Caching keyed on the observed state of a branch.
//!
//! Listings are cached together with the fingerprint that was current when
//! they were fetched, stored under a side key. A listing is reused only while
//! the remote still reports that fingerprint. Depending on the
//! [`InvalidationStrategy`] the fingerprint is either the branch head (any
//! commit invalidates) or the content hash of a single file (only changes to
//! that file invalidate).
//!
//! File bodies are cached separately, one entry per file, and revalidated
//! against the blob id reported by the directory listing, so a new commit
//! refetches only the files it actually changed.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

use super::get_or_set::get_or_set_validated;
use super::key_value_cache::CacheHandle;
use crate::provider::{self, FileContent, Fingerprint, GitProvider, TreeEntry};
use crate::util::ConcurrencyLimiter;

// =============================================================================
// InvalidationStrategy
// =============================================================================

/// What a cached listing is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidationStrategy {
    /// The head of the branch. Any commit on the branch invalidates.
    #[default]
    Branch,
    /// The content hash of the file at the listing's path. Only meaningful
    /// for collections stored in a single file.
    ContentFingerprint,
}

impl InvalidationStrategy {
    fn side_key(&self, git_ref: &str, path: &str) -> String {
        match self {
            InvalidationStrategy::Branch => format!("lastBranchCommitId.{}.{}", git_ref, path),
            InvalidationStrategy::ContentFingerprint => format!("contentSha.{}.{}", git_ref, path),
        }
    }
}

// =============================================================================
// BranchStateCache
// =============================================================================

/// Branch-state validated caching for one ref of one provider.
#[derive(Clone)]
pub struct BranchStateCache {
    provider: Arc<dyn GitProvider>,
    cache: CacheHandle,
    git_ref: String,
    limiter: ConcurrencyLimiter,
}

impl BranchStateCache {
    pub fn new(provider: Arc<dyn GitProvider>, cache: CacheHandle, git_ref: impl Into<String>) -> Self {
        Self {
            provider,
            cache,
            git_ref: git_ref.into(),
            limiter: ConcurrencyLimiter::default(),
        }
    }

    /// Bound file reads with `limiter` instead of a private default one.
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub fn provider(&self) -> &Arc<dyn GitProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    /// The fingerprint the remote reports right now, or `None` if it cannot
    /// be observed.
    async fn current_fingerprint(
        &self,
        path: &str,
        strategy: InvalidationStrategy,
    ) -> Option<Fingerprint> {
        let observed = match strategy {
            InvalidationStrategy::Branch => self
                .provider
                .branch_head(&self.git_ref)
                .await
                .map(|head| head.map(|h| h.head_fingerprint)),
            InvalidationStrategy::ContentFingerprint => self
                .provider
                .file_metadata(path, &self.git_ref)
                .await
                .map(|meta| meta.map(|m| m.content_fingerprint)),
        };
        match observed {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!(
                    "could not observe {:?} fingerprint for {}@{}: {}",
                    strategy,
                    path,
                    self.git_ref,
                    e
                );
                None
            }
        }
    }

    /// Return the cached listing for `path` if the remote fingerprint has not
    /// moved since it was stored, otherwise `fetch` a new one.
    ///
    /// Failing to observe the fingerprint is not an error; the listing is
    /// simply fetched again.
    pub async fn cached_listing<T, E, F, Fut>(
        &self,
        path: &str,
        strategy: InvalidationStrategy,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let side_key = strategy.side_key(&self.git_ref, path);
        let data_key = format!("tree.{}.{}", self.git_ref, path);

        let last = self.cache.get::<Fingerprint>(&side_key).await;
        let current = self.current_fingerprint(path, strategy).await;
        let fresh = matches!((&last, &current), (Some(last), Some(current)) if last == current);

        let listing = get_or_set_validated(&self.cache, &data_key, fetch, |_| fresh).await?;

        if !fresh {
            if let Some(current) = &current {
                self.cache.set(&side_key, current).await;
            }
        }
        Ok(listing)
    }

    /// Direct children of the directory at `path`, cached by branch head.
    pub async fn tree(&self, path: &str) -> provider::Result<Vec<TreeEntry>> {
        self.cached_listing(path, InvalidationStrategy::Branch, || {
            self.provider.list_tree(path, &self.git_ref)
        })
        .await
    }

    /// Bodies of the blob entries among `entries`, in the same order.
    ///
    /// Each body is cached under its own key and reused while its fingerprint
    /// matches the entry's blob id. Reads run concurrently but never more at
    /// once than the limiter allows. Files that disappeared since the listing
    /// are left out.
    pub async fn file_contents(&self, entries: &[TreeEntry]) -> provider::Result<Vec<FileContent>> {
        let reads = entries.iter().filter(|e| e.is_blob()).map(|entry| {
            let key = format!("file.{}.{}", self.git_ref, entry.path);
            async move {
                get_or_set_validated(
                    &self.cache,
                    &key,
                    || {
                        self.limiter
                            .run(|| self.provider.read_file(&entry.path, &self.git_ref))
                    },
                    |cached: &Option<FileContent>| {
                        cached
                            .as_ref()
                            .is_some_and(|file| file.content_fingerprint == entry.entry_id)
                    },
                )
                .await
            }
        });

        let files = try_join_all(reads).await?;
        Ok(files.into_iter().flatten().collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
