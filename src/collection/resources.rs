//! Resource name to collection mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::RecordCollection;

/// The collections served by an application, by resource name.
#[derive(Default, Clone)]
pub struct Resources {
    collections: BTreeMap<String, Arc<dyn RecordCollection>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `collection` as `name`, replacing any collection already
    /// registered under that name.
    pub fn register(&mut self, name: impl Into<String>, collection: Arc<dyn RecordCollection>) {
        self.collections.insert(name.into(), collection);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RecordCollection>> {
        self.collections.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.collections.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caches::CacheHandle;
    use crate::collection::{BranchCollection, CollectionOptions, JsonFileCollection};
    use crate::provider::MemoryProvider;
    use crate::records::ListQuery;

    #[tokio::test]
    async fn test_lookup_by_name() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put_file("main", "data/users.json", r#"[{"id": "1"}]"#);

        let mut resources = Resources::new();
        resources.register(
            "users",
            Arc::new(JsonFileCollection::new(
                provider.clone(),
                CacheHandle::noop(),
                CollectionOptions::new("data/users.json"),
            )),
        );
        resources.register("branches", Arc::new(BranchCollection::new(provider.clone())));

        assert_eq!(resources.names(), vec!["branches", "users"]);
        assert!(resources.get("posts").is_none());

        let users = resources.get("users").unwrap();
        assert_eq!(users.list(&ListQuery::default()).await.unwrap().total, 1);
    }
}
