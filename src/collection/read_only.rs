//! Read-only views of the repository's branches and history.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{CollectionError, RecordCollection, Result};
use crate::provider::GitProvider;
use crate::records::{apply_query, default_filter_records, ListOutput, ListQuery, Record};

/// Every mutation of a read-only collection fails here, before any remote call.
fn not_available<T>(operation: &'static str) -> Result<T> {
    Err(CollectionError::NotAvailable(operation))
}

// =============================================================================
// BranchCollection
// =============================================================================

/// The repository's branches as records `{id, name, commit: {id}}`.
pub struct BranchCollection {
    provider: Arc<dyn GitProvider>,
}

impl BranchCollection {
    pub fn new(provider: Arc<dyn GitProvider>) -> Self {
        Self { provider }
    }

    async fn records(&self) -> Result<Vec<Record>> {
        let branches = self.provider.list_branches().await?;
        Ok(branches
            .into_iter()
            .filter_map(|branch| {
                Record::from_value(json!({
                    "id": branch.name,
                    "name": branch.name,
                    "commit": { "id": branch.head_fingerprint },
                }))
            })
            .collect())
    }
}

#[async_trait]
impl RecordCollection for BranchCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        Ok(apply_query(self.records().await?, query, default_filter_records))
    }

    async fn get_one(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.records().await?.into_iter().find(|r| r.has_id(id)))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        let records = self.records().await?;
        Ok(records
            .into_iter()
            .filter(|r| ids.iter().any(|id| r.has_id(id)))
            .collect())
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

// =============================================================================
// CommitCollection
// =============================================================================

/// The history of one branch, newest first, as records
/// `{id, message, parent, timestamp}`.
pub struct CommitCollection {
    provider: Arc<dyn GitProvider>,
    git_ref: String,
}

impl CommitCollection {
    pub fn new(provider: Arc<dyn GitProvider>, git_ref: impl Into<String>) -> Self {
        Self {
            provider,
            git_ref: git_ref.into(),
        }
    }

    async fn records(&self) -> Result<Vec<Record>> {
        let commits = self.provider.list_commits(&self.git_ref).await?;
        Ok(commits
            .into_iter()
            .filter_map(|commit| {
                Record::from_value(json!({
                    "id": commit.id,
                    "message": commit.message,
                    "parent": commit.parent,
                    "timestamp": commit.timestamp.to_rfc3339(),
                }))
            })
            .collect())
    }
}

#[async_trait]
impl RecordCollection for CommitCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        Ok(apply_query(self.records().await?, query, default_filter_records))
    }

    async fn get_one(&self, id: &str) -> Result<Option<Record>> {
        Ok(self.records().await?.into_iter().find(|r| r.has_id(id)))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        let records = self.records().await?;
        Ok(records
            .into_iter()
            .filter(|r| ids.iter().any(|id| r.has_id(id)))
            .collect())
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
