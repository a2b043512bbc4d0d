//! A collection stored as one JSON array file.

use std::sync::Arc;

use async_trait::async_trait;

use super::{CollectionError, CollectionOptions, MutationQueue, RecordCollection, Result};
use crate::caches::{BranchStateCache, CacheHandle};
use crate::provider::{CommitAction, GitProvider};
use crate::records::{ListOutput, ListQuery, Record, ID_FIELD};
use crate::util::ReadCoalescer;

/// All records of the collection in a single file, e.g. `data/users.json`.
///
/// Listings are cached under the file path and revalidated with the
/// configured strategy. Concurrent listings share one fetch. Every mutation
/// rewrites the whole file in one commit.
pub struct JsonFileCollection {
    options: CollectionOptions,
    state: BranchStateCache,
    queue: MutationQueue,
    listings: ReadCoalescer<(), Vec<Record>, CollectionError>,
}

impl JsonFileCollection {
    pub fn new(provider: Arc<dyn GitProvider>, cache: CacheHandle, options: CollectionOptions) -> Self {
        let state = BranchStateCache::new(provider, cache, options.git_ref.clone());
        Self::with_state(state, options)
    }

    /// Build over an existing branch-state cache, sharing its limiter.
    pub fn with_state(state: BranchStateCache, options: CollectionOptions) -> Self {
        Self {
            options,
            state,
            queue: MutationQueue::new(),
            listings: ReadCoalescer::new(),
        }
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    fn provider(&self) -> &Arc<dyn GitProvider> {
        self.state.provider()
    }

    /// Records as last cached, refreshed if the remote has moved.
    async fn cached_records(&self) -> Result<Vec<Record>> {
        self.listings
            .call((), || async {
                self.state
                    .cached_listing(&self.options.path, self.options.strategy, || async {
                        Ok(self.read_records().await?.0)
                    })
                    .await
            })
            .await
    }

    /// Records straight from the provider, and whether the file exists.
    async fn read_records(&self) -> Result<(Vec<Record>, bool)> {
        let file = self
            .provider()
            .read_file(&self.options.path, &self.options.git_ref)
            .await?;
        match file {
            Some(file) => Ok((self.options.codec.decode_collection(&file.bytes)?, true)),
            None => Ok((Vec::new(), false)),
        }
    }

    async fn write_records(&self, exists: bool, message: &str, records: &[Record]) -> Result<()> {
        let content = self.options.codec.encode_collection(records)?;
        let action = if exists {
            CommitAction::update(&self.options.path, content)
        } else {
            CommitAction::create(&self.options.path, content)
        };
        self.provider()
            .commit(&self.options.git_ref, message, &[action])
            .await?;
        Ok(())
    }

    async fn create_record(&self, data: Record) -> Result<Record> {
        let mut record = data;
        record.set_id(self.options.generate_id());
        let record = self.options.transform(record);

        let (mut records, exists) = self.read_records().await?;
        records.push(record.clone());
        self.write_records(
            exists,
            &format!("Create new record in {}", self.options.path),
            &records,
        )
        .await?;
        Ok(record)
    }

    async fn update_record(&self, id: &str, data: Record) -> Result<Record> {
        let (mut records, exists) = self.read_records().await?;
        let index = records
            .iter()
            .position(|r| r.has_id(id))
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;

        let mut next = match records[index].get(ID_FIELD) {
            Some(stored_id) => Record::with_id(stored_id.clone()),
            None => Record::new(),
        };
        next.merge(&data.without_id());
        let next = self.options.transform(next);

        if records[index] == next {
            tracing::debug!("record {} in {} unchanged, skipping commit", id, self.options.path);
            return Ok(next);
        }
        records[index] = next.clone();
        self.write_records(
            exists,
            &format!("Update record {} in {}", id, self.options.path),
            &records,
        )
        .await?;
        Ok(next)
    }

    async fn update_records(&self, ids: &[String], data: Record) -> Result<Vec<Record>> {
        let (mut records, exists) = self.read_records().await?;
        let patch = self.options.transform(data.without_id()).without_id();

        let mut updated = Vec::new();
        for record in records.iter_mut() {
            if ids.iter().any(|id| record.has_id(id)) {
                record.merge(&patch);
                updated.push(record.clone());
            }
        }
        if updated.is_empty() {
            return Ok(updated);
        }

        self.write_records(
            exists,
            &format!("Update many records in {}", self.options.path),
            &records,
        )
        .await?;
        Ok(updated)
    }

    async fn delete_record(&self, id: &str) -> Result<Record> {
        let (mut records, exists) = self.read_records().await?;
        let index = records
            .iter()
            .position(|r| r.has_id(id))
            .ok_or_else(|| CollectionError::NotFound(id.to_string()))?;
        let removed = records.remove(index);

        self.write_records(
            exists,
            &format!("Delete record {} in {}", id, self.options.path),
            &records,
        )
        .await?;
        Ok(removed)
    }

    async fn delete_records(&self, ids: &[String]) -> Result<Vec<String>> {
        let (mut records, exists) = self.read_records().await?;
        let before = records.len();
        records.retain(|r| !ids.iter().any(|id| r.has_id(id)));

        if records.len() != before {
            self.write_records(
                exists,
                &format!("Delete many records in {}", self.options.path),
                &records,
            )
            .await?;
        }
        Ok(ids.to_vec())
    }
}

#[async_trait]
impl RecordCollection for JsonFileCollection {
    async fn list(&self, query: &ListQuery) -> Result<ListOutput> {
        let records = self
            .cached_records()
            .await
            .map_err(|e| self.options.patch_error(e))?;
        Ok(self.options.apply_query(records, query))
    }

    async fn get_one(&self, id: &str) -> Result<Option<Record>> {
        let records = self
            .cached_records()
            .await
            .map_err(|e| self.options.patch_error(e))?;
        Ok(records.into_iter().find(|r| r.has_id(id)))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<Record>> {
        let records = self
            .cached_records()
            .await
            .map_err(|e| self.options.patch_error(e))?;
        Ok(records
            .into_iter()
            .filter(|r| ids.iter().any(|id| r.has_id(id)))
            .collect())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caches::{InvalidationStrategy, MemoryKeyValueCache};
    use crate::provider::{MemoryProvider, ProviderError, TimeoutProvider};
    use crate::records::{JsonCodec, RecordCodec};
    use serde_json::{json, Value};
    use std::time::Duration;

    const USERS: &str = "data/users.json";

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn setup(seed: Value) -> (Arc<MemoryProvider>, JsonFileCollection) {
        let provider = Arc::new(MemoryProvider::new());
        provider.put_file("main", USERS, seed.to_string());
        let cache = CacheHandle::new("test", Arc::new(MemoryKeyValueCache::default()));
        let options = CollectionOptions::new(USERS).with_id_generator(|| "new".to_string());
        let collection = JsonFileCollection::new(provider.clone(), cache, options);
        (provider, collection)
    }

    fn stored(provider: &MemoryProvider) -> Vec<Record> {
        let bytes = provider.file_bytes("main", USERS).unwrap();
        JsonCodec::default().decode_collection(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_mutations_commit_in_order() {
        let (provider, collection) = setup(json!([{"id": "1", "name": "Ann"}]));

        let (updated, created) = tokio::join!(
            collection.update("1", record(json!({"name": "Anna"}))),
            collection.create(record(json!({"name": "Bob"}))),
        );
        assert_eq!(updated.unwrap().get("name"), Some(&json!("Anna")));
        assert_eq!(created.unwrap().id().as_deref(), Some("new"));

        assert_eq!(
            provider.commit_messages("main"),
            vec![
                "Initial commit",
                "Seed data/users.json",
                "Update record 1 in data/users.json",
                "Create new record in data/users.json",
            ]
        );
        assert_eq!(
            stored(&provider),
            vec![
                record(json!({"id": "1", "name": "Anna"})),
                record(json!({"id": "new", "name": "Bob"})),
            ]
        );

        let listed = collection.list(&ListQuery::default()).await.unwrap();
        assert_eq!(listed.total, 2);
    }

    #[tokio::test]
    async fn test_delete_queued_behind_update_sees_it() {
        let (provider, collection) = setup(json!([
            {"id": "1", "name": "Ann"},
            {"id": "2", "name": "Bob"}
        ]));

        let (updated, deleted) = tokio::join!(
            collection.update("1", record(json!({"name": "Anna"}))),
            collection.delete("1"),
        );
        assert_eq!(updated.unwrap(), record(json!({"id": "1", "name": "Anna"})));
        assert_eq!(deleted.unwrap(), record(json!({"id": "1", "name": "Anna"})));

        let messages = provider.commit_messages("main");
        assert_eq!(
            &messages[2..],
            &[
                "Update record 1 in data/users.json".to_string(),
                "Delete record 1 in data/users.json".to_string(),
            ]
        );
        assert_eq!(stored(&provider), vec![record(json!({"id": "2", "name": "Bob"}))]);
    }

    #[tokio::test]
    async fn test_timed_out_mutation_does_not_block_next() {
        let memory = Arc::new(MemoryProvider::new());
        memory.put_file("main", USERS, json!([{"id": "1", "name": "Ann"}]).to_string());
        memory.set_latency(Some(Duration::from_millis(300)));

        let timeout = Duration::from_millis(50);
        let provider = Arc::new(TimeoutProvider::new(memory.clone(), timeout));
        let cache = CacheHandle::new("test", Arc::new(MemoryKeyValueCache::default()));
        let options = CollectionOptions::new(USERS).with_id_generator(|| "new".to_string());
        let collection = JsonFileCollection::new(provider, cache, options);

        let (updated, created, _) = tokio::join!(
            collection.update("1", record(json!({"name": "Anna"}))),
            collection.create(record(json!({"name": "Bob"}))),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                memory.set_latency(None);
            },
        );

        assert_eq!(
            updated,
            Err(CollectionError::Provider(ProviderError::Timeout(timeout)))
        );
        assert_eq!(created.unwrap().id().as_deref(), Some("new"));
        assert_eq!(
            memory.commit_messages("main").last().map(String::as_str),
            Some("Create new record in data/users.json")
        );
        assert_eq!(
            stored(&memory),
            vec![
                record(json!({"id": "1", "name": "Ann"})),
                record(json!({"id": "new", "name": "Bob"})),
            ]
        );
    }

    #[tokio::test]
    async fn test_unchanged_update_skips_commit() {
        let (provider, collection) = setup(json!([{"id": "1", "name": "Ann"}]));

        let result = collection
            .update("1", record(json!({"id": "1", "name": "Ann"})))
            .await
            .unwrap();
        assert_eq!(result, record(json!({"id": "1", "name": "Ann"})));
        assert_eq!(provider.calls().commit, 0);
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_block_next_mutation() {
        let (provider, collection) = setup(json!([]));
        provider.fail_next_commit(ProviderError::Conflict("stale base".to_string()));

        let (first, second) = tokio::join!(
            collection.create(record(json!({"name": "A"}))),
            collection.create(record(json!({"name": "B"}))),
        );
        assert_eq!(
            first,
            Err(CollectionError::Provider(ProviderError::Conflict(
                "stale base".to_string()
            )))
        );
        assert!(second.is_ok());

        let stored = stored(&provider);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get("name"), Some(&json!("B")));
    }

    #[tokio::test]
    async fn test_missing_file_is_created() {
        let provider = Arc::new(MemoryProvider::new());
        let collection = JsonFileCollection::new(
            provider.clone(),
            CacheHandle::noop(),
            CollectionOptions::new("data/posts.json").with_id_generator(|| "p1".to_string()),
        );

        assert_eq!(collection.list(&ListQuery::default()).await.unwrap().total, 0);
        collection.create(record(json!({"title": "Hi"}))).await.unwrap();

        let bytes = provider.file_bytes("main", "data/posts.json").unwrap();
        assert_eq!(
            JsonCodec::default().decode_collection(&bytes).unwrap(),
            vec![record(json!({"title": "Hi", "id": "p1"}))]
        );
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (provider, collection) = setup(json!([{"id": "1"}]));

        let result = collection.update("9", record(json!({"name": "x"}))).await;
        assert_eq!(result, Err(CollectionError::NotFound("9".to_string())));
        let result = collection.delete("9").await;
        assert_eq!(result, Err(CollectionError::NotFound("9".to_string())));

        let result = collection.delete_many(&["9".to_string()]).await;
        assert_eq!(result, Ok(vec!["9".to_string()]));
        assert_eq!(provider.calls().commit, 0);
    }

    #[tokio::test]
    async fn test_update_many_and_delete_many() {
        let (provider, collection) = setup(json!([
            {"id": "1", "role": "user"},
            {"id": 2, "role": "user"},
            {"id": "3", "role": "user"}
        ]));

        let updated = collection
            .update_many(
                &["1".to_string(), "2".to_string()],
                record(json!({"role": "admin"})),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(updated[1], record(json!({"id": 2, "role": "admin"})));

        collection
            .delete_many(&["1".to_string(), "3".to_string()])
            .await
            .unwrap();
        assert_eq!(stored(&provider), vec![record(json!({"id": 2, "role": "admin"}))]);
        let messages = provider.commit_messages("main");
        assert_eq!(
            &messages[2..],
            &[
                "Update many records in data/users.json".to_string(),
                "Delete many records in data/users.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_listings_share_one_read() {
        let (provider, collection) = setup(json!([{"id": "1"}]));

        let query = ListQuery::default();
        let (a, b) = tokio::join!(collection.list(&query), collection.list(&query));
        assert_eq!(a.unwrap().total, 1);
        assert_eq!(b.unwrap().total, 1);
        assert_eq!(provider.calls().read_file, 1);

        collection.get_one("1").await.unwrap().unwrap();
        assert_eq!(provider.calls().read_file, 1);
    }

    #[tokio::test]
    async fn test_hooks_are_applied() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put_file("main", USERS, "[]");
        let options = CollectionOptions::new(USERS)
            .with_strategy(InvalidationStrategy::ContentFingerprint)
            .with_record_transform(|mut r| {
                r.insert("touched", json!(true));
                r
            })
            .with_error_transform(|e| CollectionError::InvalidInput(format!("wrapped: {}", e)));
        let collection = JsonFileCollection::new(provider.clone(), CacheHandle::noop(), options);

        let created = collection.create(record(json!({"name": "A"}))).await.unwrap();
        assert_eq!(created.get("touched"), Some(&json!(true)));

        let result = collection.delete("missing").await;
        assert_eq!(
            result,
            Err(CollectionError::InvalidInput(
                "wrapped: record missing not found".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_list_query_and_reference() {
        let (_provider, collection) = setup(json!([
            {"id": "1", "author": "a", "title": "One"},
            {"id": "2", "author": "b", "title": "Two"},
            {"id": "3", "author": "a", "title": "Three"}
        ]));

        let output = collection
            .get_many_reference("author", "a", &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(output.total, 2);

        let many = collection
            .get_many(&["3".to_string(), "1".to_string()])
            .await
            .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].id().as_deref(), Some("1"));
    }
}
