//! Binary files exposed as records.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use serde_json::{json, Value};

use super::{CollectionError, CollectionOptions, MutationQueue, RecordCollection, Result};
use crate::caches::{BranchStateCache, CacheHandle};
use crate::provider::{CommitAction, Encoding, FileContent, GitProvider, TreeEntry};
use crate::records::{ListOutput, ListQuery, Record};

/// Files in a directory, typically images, as records of the form
/// `{"id": name, "path": name, "data": {"src": "data:...;base64,..."}}`.
///
/// The id is the file name including its extension. Listings include the
/// `data` member only when the query asks for it with `load_data`.
pub struct RawFileCollection {
    options: CollectionOptions,
    state: BranchStateCache,
    queue: MutationQueue,
}

impl RawFileCollection {
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

    fn provider(&self) -> &Arc<dyn GitProvider> {
        self.state.provider()
    }

    /// Path relative to the collection directory.
    fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(&self.options.path)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(path)
    }

    fn entry_record(&self, entry: &TreeEntry) -> Record {
        let name = self.relative(&entry.path);
        file_record(name)
    }

    fn content_record(&self, file: &FileContent) -> Record {
        let name = self.relative(&file.path);
        let mut record = file_record(name);
        record.insert("data", json!({ "src": data_url(name, &file.bytes) }));
        record
    }

    async fn list_records(&self, load_data: bool) -> Result<Vec<Record>> {
        let entries: Vec<TreeEntry> = self
            .state
            .tree(&self.options.path)
            .await?
            .into_iter()
            .filter(TreeEntry::is_blob)
            .collect();

        if !load_data {
            return Ok(entries.iter().map(|e| self.entry_record(e)).collect());
        }
        let files = self.state.file_contents(&entries).await?;
        Ok(files.iter().map(|f| self.content_record(f)).collect())
    }

    async fn read_record(&self, id: &str) -> Result<Option<Record>> {
        let file = self
            .provider()
            .read_file(&self.options.file_path(id), &self.options.git_ref)
            .await?;
        Ok(file.map(|f| self.content_record(&f)))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let metadata = self
            .provider()
            .file_metadata(&self.options.file_path(id), &self.options.git_ref)
            .await?;
        Ok(metadata.is_some())
    }

    async fn commit(&self, message: &str, actions: &[CommitAction]) -> Result<()> {
        self.provider()
            .commit(&self.options.git_ref, message, actions)
            .await?;
        Ok(())
    }

    async fn create_file(&self, data: Record) -> Result<Record> {
        let name = new_file_name(&data)
            .ok_or_else(|| CollectionError::InvalidInput("file name is missing".to_string()))?;
        let content = file_content(&data)?
            .ok_or_else(|| CollectionError::InvalidInput("file content is missing".to_string()))?;

        let path = self.options.file_path(&name);
        let action = CommitAction::create(&path, content).with_encoding(Encoding::Base64);
        self.commit(&format!("Create {}", path), &[action]).await?;
        Ok(file_record(&name))
    }

    async fn update_file(&self, id: &str, data: Record) -> Result<Record> {
        if !self.exists(id).await? {
            return Err(CollectionError::NotFound(id.to_string()));
        }

        let name = data
            .get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string());
        let path = self.options.file_path(&name);
        let previous_path = self.options.file_path(id);
        let should_move = path != previous_path;
        let content = file_content(&data)?;

        let message = match (&content, should_move) {
            (Some(_), false) => format!("Update {}", path),
            (Some(_), true) => format!("Delete {} and create {}", previous_path, path),
            (None, _) => format!("Move {} to {}", previous_path, path),
        };

        let mut actions = Vec::new();
        if should_move {
            actions.push(CommitAction::move_file(&previous_path, &path));
        }
        if let Some(content) = content {
            actions.push(CommitAction::update(&path, content).with_encoding(Encoding::Base64));
        }
        if !actions.is_empty() {
            self.commit(&message, &actions).await?;
        }

        let mut record = data;
        record.merge(&file_record(&name));
        Ok(record)
    }

    async fn delete_file(&self, id: &str) -> Result<Record> {
        if !self.exists(id).await? {
            return Err(CollectionError::NotFound(id.to_string()));
        }
        let path = self.options.file_path(id);
        self.commit(&format!("Delete {}", path), &[CommitAction::delete(&path)])
            .await?;
        Ok(file_record(id))
    }

    async fn delete_files(&self, ids: &[String]) -> Result<Vec<String>> {
        let present = try_join_all(ids.iter().map(|id| self.exists(id))).await?;
        let actions: Vec<CommitAction> = ids
            .iter()
            .zip(present)
            .filter(|(_, exists)| *exists)
            .map(|(id, _)| CommitAction::delete(self.options.file_path(id)))
            .collect();

        if !actions.is_empty() {
            self.commit(&format!("Delete many in {}", self.options.path), &actions)
                .await?;
        }
        Ok(ids.to_vec())
    }
}

#[async_trait]
impl RecordCollection for RawFileCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        let records = self
            .list_records(query.load_data)
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
            .run(|| self.create_file(data))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn update(&self, id: &str, data: Record) -> Result<Record> {
        self.queue
            .run(|| self.update_file(id, data))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn update_many(&self, _ids: &[String], _data: Record) -> Result<Vec<Record>> {
        Err(self
            .options
            .patch_error(CollectionError::NotAvailable("update_many")))
    }

    async fn delete(&self, id: &str) -> Result<Record> {
        self.queue
            .run(|| self.delete_file(id))
            .await
            .map_err(|e| self.options.patch_error(e))
    }

    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>> {
        self.queue
            .run(|| self.delete_files(ids))
            .await
            .map_err(|e| self.options.patch_error(e))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn file_record(name: &str) -> Record {
    let mut record = Record::with_id(name);
    record.insert("path", Value::String(name.to_string()));
    record
}

/// File name for a new file: `data.title`, else `path`, else `id`.
fn new_file_name(data: &Record) -> Option<String> {
    data.get("data")
        .and_then(|d| d.get("title"))
        .or_else(|| data.get("path"))
        .or_else(|| data.get("id"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Bytes carried in `data.src`, if any.
fn file_content(data: &Record) -> Result<Option<Vec<u8>>> {
    let src = match data.get("data").and_then(|d| d.get("src")).and_then(Value::as_str) {
        Some(src) => src,
        None => return Ok(None),
    };
    let payload = src.rsplit(',').next().unwrap_or(src);
    STANDARD
        .decode(payload)
        .map(Some)
        .map_err(|e| CollectionError::InvalidInput(format!("file content is not base64: {}", e)))
}

fn data_url(name: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type(name), STANDARD.encode(bytes))
}

fn mime_type(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
