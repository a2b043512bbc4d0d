//! Read-only view of the CI pipelines that ran on one branch.
//!
//! A listing only carries each pipeline's id and commit. Details are fetched
//! per pipeline and cached by id; a cached entry is reused for as long as the
//! pipeline still points at the same commit.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::json;

use super::{CollectionError, RecordCollection, Result};
use crate::caches::{get_or_set_validated, CacheHandle};
use crate::provider::{GitProvider, PipelineInfo, PipelineSummary};
use crate::records::{apply_query, default_filter_records, ListOutput, ListQuery, Record};
use crate::util::{ConcurrencyLimiter, DEFAULT_CONCURRENCY};

/// CI pipelines of `git_ref` as records `{id, sha, status, ref, created_at}`.
pub struct PipelineCollection {
    provider: Arc<dyn GitProvider>,
    git_ref: String,
    cache: CacheHandle,
    limiter: ConcurrencyLimiter,
}

impl PipelineCollection {
    pub fn new(
        provider: Arc<dyn GitProvider>,
        git_ref: impl Into<String>,
        cache: CacheHandle,
    ) -> Self {
        Self {
            provider,
            git_ref: git_ref.into(),
            cache,
            limiter: ConcurrencyLimiter::new(DEFAULT_CONCURRENCY),
        }
    }

    /// Share a limiter with other readers of the same provider.
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Details of a listed pipeline, from the cache unless it has moved to
    /// another commit since it was stored.
    async fn details(&self, summary: &PipelineSummary) -> Result<Option<PipelineInfo>> {
        let pipeline = get_or_set_validated(
            &self.cache,
            &pipeline_key(&summary.id),
            || self.limiter.run(|| self.provider.pipeline(&summary.id)),
            |cached: &Option<PipelineInfo>| {
                cached
                    .as_ref()
                    .is_some_and(|pipeline| pipeline.sha == summary.sha)
            },
        )
        .await?;
        Ok(pipeline)
    }

    async fn records(&self) -> Result<Vec<Record>> {
        let listing = self.provider.list_pipelines(&self.git_ref).await?;
        let details = try_join_all(listing.iter().map(|summary| self.details(summary))).await?;
        Ok(details
            .iter()
            .flatten()
            .filter_map(pipeline_record)
            .collect())
    }
}

fn pipeline_key(id: &str) -> String {
    format!("pipeline.{}", id)
}

fn pipeline_record(pipeline: &PipelineInfo) -> Option<Record> {
    Record::from_value(json!({
        "id": pipeline.id,
        "sha": pipeline.sha,
        "status": pipeline.status,
        "ref": pipeline.git_ref,
        "created_at": pipeline.created_at.to_rfc3339(),
    }))
}

fn not_available<T>(operation: &'static str) -> Result<T> {
    Err(CollectionError::NotAvailable(operation))
}

#[async_trait]
impl RecordCollection for PipelineCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        Ok(apply_query(self.records().await?, query, default_filter_records))
    }

    async fn get_one(&self, id: &str) -> Result<Option<Record>> {
        let pipeline = self.limiter.run(|| self.provider.pipeline(id)).await?;
        Ok(pipeline.as_ref().and_then(pipeline_record))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        let found = try_join_all(ids.iter().map(|id| self.get_one(id))).await?;
        Ok(found.into_iter().flatten().collect())
    }

    async fn create(&self, _data: Record) -> Result<Record> {
        not_available("create")
    }

    async fn update(&self, _id: &str, _data: Record) -> Result<Record> {
        not_available("update")
    }

    async fn update_many(&self, _ids: &[String], _data: Record) -> Result<Vec<Record>> {
        not_available("update_many")
    }

    async fn delete(&self, _id: &str) -> Result<Record> {
        not_available("delete")
    }

    async fn delete_many(&self, _ids: &[String]) -> Result<Vec<String>> {
        not_available("delete_many")
    }
}
