//! A collection stored as one JSON file per record.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{CollectionError, CollectionOptions, MutationQueue, RecordCollection, Result};
use crate::caches::{BranchStateCache, CacheHandle};
use crate::provider::{CommitAction, FileContent, GitProvider};
use crate::records::{ListOutput, ListQuery, Record};

/// Records as files in a directory, e.g. `data/posts/{id}.json`.
///
/// The record id is the file name without its extension. Listings read the
/// directory tree and every record file through the branch-state cache, so
/// after a commit only the files it changed are downloaded again. Single
/// reads go straight to the provider.
pub struct JsonDirectoryCollection {
    options: CollectionOptions,
    state: BranchStateCache,
    queue: MutationQueue,
}

impl JsonDirectoryCollection {
    pub fn new(provider: Arc<dyn GitProvider>, cache: CacheHandle, options: CollectionOptions) -> Self {
        let state = BranchStateCache::new(provider, cache, options.git_ref.clone());
        Self::with_state(state, options)
    }

    pub fn with_state(state: BranchStateCache, options: CollectionOptions) -> Self {
        Self {
            options,
            state,
            queue: MutationQueue::new(),
        }
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    fn provider(&self) -> &Arc<dyn GitProvider> {
        self.state.provider()
    }

    fn file_name(&self, id: &str) -> String {
        format!("{}.{}", id, self.options.codec.extension())
    }

    /// Path of the file holding record `id`. Ids must name a single file
    /// directly inside the collection directory.
    fn record_path(&self, id: &str) -> Result<String> {
        if id.is_empty() || id == "." || id == ".." || id.contains('/') || id.contains('\\') {
            return Err(CollectionError::InvalidInput(format!(
                "invalid record id '{}'",
                id
            )));
        }
        Ok(self.options.file_path(&self.file_name(id)))
    }

    /// The id encoded in a file path, if the file has the codec's extension.
    fn id_from_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        let name = path.rsplit('/').next().unwrap_or(path);
        name.strip_suffix(self.options.codec.extension())?
            .strip_suffix('.')
            .filter(|id| !id.is_empty())
    }

    fn decode(&self, file: &FileContent) -> Result<Option<Record>> {
        match self.id_from_path(&file.path) {
            Some(id) => Ok(Some(self.options.codec.decode_record(id, &file.bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        let entries = self.state.tree(&self.options.path).await?;
        let entries: Vec<_> = entries
            .into_iter()
            .filter(|e| e.is_blob() && self.id_from_path(&e.path).is_some())
            .collect();
        let files = self.state.file_contents(&entries).await?;

        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            records.extend(self.decode(file)?);
        }
        Ok(records)
    }

    /// The stored record, read uncached.
    async fn read_record(&self, id: &str) -> Result<Option<Record>> {
        let file = self
            .provider()
            .read_file(&self.record_path(id)?, &self.options.git_ref)
            .await?;
        match file {
            Some(file) => Ok(Some(self.options.codec.decode_record(id, &file.bytes)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, message: &str, actions: &[CommitAction]) -> Result<()> {
        self.provider()
            .commit(&self.options.git_ref, message, actions)
            .await?;
        Ok(())
    }

    async fn create_record(&self, data: Record) -> Result<Record> {
        let mut record = data;
        record.set_id(self.options.generate_id());
        let record = self.options.transform(record);
        let id = record
            .id()
            .ok_or_else(|| CollectionError::InvalidInput("record has no id".to_string()))?;

        let path = self.record_path(&id)?;
        let content = self.options.codec.encode_record(&record)?;
        self.commit(&format!("Create {}", path), &[CommitAction::create(&path, content)])
            .await?;
        Ok(record)
    }

    async fn update_record(&self, id: &str, data: Record) -> Result<Record> {
        let current = self
            .read_record(id)
            .await?
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;

        let mut next = Record::with_id(id);
        next.merge(&data.without_id());
        let next = self.options.transform(next);

        if next == current {
            tracing::debug!("record {} unchanged, skipping commit", id);
            return Ok(next);
        }

        let content = self.options.codec.encode_record(&next)?;
        let path = self.record_path(id)?;
        self.commit(&format!("Update {}", path), &[CommitAction::update(&path, content)])
            .await?;
        Ok(next)
    }

    async fn update_records(&self, ids: &[String], data: Record) -> Result<Vec<Record>> {
        let current = try_join_all(ids.iter().map(|id| self.read_record(id))).await?;
        let patch = data.without_id();

        let mut updated = Vec::new();
        let mut actions = Vec::new();
        for mut record in current.into_iter().flatten() {
            record.merge(&patch);
            let record = self.options.transform(record);
            if let Some(id) = record.id() {
                let content = self.options.codec.encode_record(&record)?;
                actions.push(CommitAction::update(self.record_path(&id)?, content));
                updated.push(record);
            }
        }
        if actions.is_empty() {
            return Ok(updated);
        }

        self.commit(&format!("Update many in {}", self.options.path), &actions)
            .await?;
        Ok(updated)
    }

    async fn delete_record(&self, id: &str) -> Result<Record> {
        let current = self
            .read_record(id)
            .await?
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;

        let path = self.record_path(id)?;
        self.commit(&format!("Delete {}", path), &[CommitAction::delete(&path)])
            .await?;
        Ok(current)
    }

    async fn delete_records(&self, ids: &[String]) -> Result<Vec<String>> {
        let current = try_join_all(ids.iter().map(|id| self.read_record(id))).await?;
        let actions = current
            .into_iter()
            .flatten()
            .filter_map(|record| record.id())
            .map(|id| Ok(CommitAction::delete(self.record_path(&id)?)))
            .collect::<Result<Vec<CommitAction>>>()?;

        if !actions.is_empty() {
            self.commit(&format!("Delete many in {}", self.options.path), &actions)
                .await?;
        }
        Ok(ids.to_vec())
    }
}

#[async_trait]
impl RecordCollection for JsonDirectoryCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        let records = self
            .list_records()
            .await
            .map_err(|e| self.options.patch_error(e))?;
        Ok(self.options.apply_query(records, query))
    }

    async fn get_one(&self, id: &str) -> Result<Option<Record>> {
        self.read_record(id)
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        let records = try_join_all(ids.iter().map(|id| self.read_record(id)))
            .await
            .map_err(|e| self.options.patch_error(e))?;
        Ok(records.into_iter().flatten().collect())
    }

    async fn create(&self, data: Record) -> Result<Record> {
        self.queue
            .run(|| self.create_record(data))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn update(&self, id: &str, data: Record) -> Result<Record> {
        self.queue
            .run(|| self.update_record(id, data))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn update_many(&self, ids: &[String], data: Record) -> Result<Vec<Record>> {
        self.queue
            .run(|| self.update_records(ids, data))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn delete(&self, id: &str) -> Result<Record> {
        self.queue
            .run(|| self.delete_record(id))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>> {
        self.queue
            .run(|| self.delete_records(ids))
            .await
            .map_err(|e| self.options.patch_error(e))
    }
}
