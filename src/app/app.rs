//! Top-level application component.
//!
//! The [`App`] owns all global services and is the root for the application's functionality.

use std::sync::Arc;

use thiserror::Error;

use crate::caches::{BranchStateCache, CacheError, CacheHandle, CacheRegistry};
use crate::collection::{
    BranchCollection, CommitCollection, JsonDirectoryCollection, JsonFileCollection,
    PipelineCollection, RawFileCollection, RecordCollection, Resources,
};
use crate::config::{read_config, CacheBackend, CollectionKind, ConfigHelper, ConfigSource};
use crate::provider::{FsProvider, GitProvider, TimeoutProvider};
use crate::util::ConcurrencyLimiter;

/// Name of the cache shared by every configured collection. Keys carry the
/// ref and path, so collections never collide.
pub const RECORD_CACHE_NAME: &str = "records";

/// Resource name of the read-only branch listing.
pub const BRANCHES_RESOURCE: &str = "branches";

/// Resource name of the read-only commit history.
pub const COMMITS_RESOURCE: &str = "commits";

/// Resource name of the read-only CI pipeline listing. Also the name of the
/// cache holding pipeline details.
pub const PIPELINES_RESOURCE: &str = "pipelines";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during App operations.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The persistent cache could not be opened.
    #[error("failed to open cache: {0}")]
    Cache(#[from] CacheError),

    /// No collection is registered under this name.
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
}

/// Result type for App operations.
pub type Result<T> = std::result::Result<T, AppError>;

// =============================================================================
// Context Types
// =============================================================================

/// Context for creating an App.
#[derive(Default)]
pub struct AppContext {
    /// Source for configuration files.
    pub config_source: ConfigSource,
}

// =============================================================================
// App
// =============================================================================

/// The top-level application component.
///
/// Owns the provider, the cache registry, the shared read limiter and every
/// registered resource.
pub struct App {
    config: ConfigHelper,
    provider: Arc<dyn GitProvider>,
    caches: CacheRegistry,
    resources: Resources,
}

impl App {
    /// Create a new App with the given context, serving the repository
    /// directory named by `[repository] root`.
    pub fn new(ctx: AppContext) -> Result<Self> {
        let config_result =
            read_config(&ctx.config_source).map_err(|e| AppError::Config(e.to_string()))?;
        for warning in &config_result.warnings {
            tracing::warn!("{}", warning);
        }

        let config = ConfigHelper::new(config_result.config);
        let repository = &config.config().repository;
        let provider = FsProvider::new(&repository.root, repository.git_ref.clone());
        Self::with_provider(config, Arc::new(provider))
    }

    /// Create an App over an existing provider. Every provider call is bounded
    /// by the configured timeout.
    pub fn with_provider(config: ConfigHelper, provider: Arc<dyn GitProvider>) -> Result<Self> {
        let provider: Arc<dyn GitProvider> =
            Arc::new(TimeoutProvider::new(provider, config.provider_timeout()));
        let caches = open_caches(&config)?;
        let limiter = ConcurrencyLimiter::new(config.read_concurrency());
        let cache = caches.init(RECORD_CACHE_NAME);

        let mut resources = Resources::new();
        for (name, collection) in &config.config().collections {
            let options = config.collection_options(collection);
            let state = BranchStateCache::new(
                Arc::clone(&provider),
                cache.clone(),
                options.git_ref.clone(),
            )
            .with_limiter(limiter.clone());

            let resource: Arc<dyn RecordCollection> = match collection.kind {
                CollectionKind::File => Arc::new(JsonFileCollection::with_state(state, options)),
                CollectionKind::Directory => {
                    Arc::new(JsonDirectoryCollection::with_state(state, options))
                }
                CollectionKind::Raw => Arc::new(RawFileCollection::with_state(state, options)),
            };
            tracing::debug!(
                "registered {:?} collection {} at {}",
                collection.kind,
                name,
                collection.path
            );
            resources.register(name.clone(), resource);
        }

        resources.register(
            BRANCHES_RESOURCE,
            Arc::new(BranchCollection::new(Arc::clone(&provider))),
        );
        resources.register(
            COMMITS_RESOURCE,
            Arc::new(CommitCollection::new(
                Arc::clone(&provider),
                config.config().repository.git_ref.clone(),
            )),
        );
        resources.register(
            PIPELINES_RESOURCE,
            Arc::new(
                PipelineCollection::new(
                    Arc::clone(&provider),
                    config.config().repository.git_ref.clone(),
                    caches.init(PIPELINES_RESOURCE),
                )
                .with_limiter(limiter.clone()),
            ),
        );

        Ok(Self {
            config,
            provider,
            caches,
            resources,
        })
    }

    /// Get the configuration helper.
    pub fn config(&self) -> &ConfigHelper {
        &self.config
    }

    /// The timeout-bounded provider shared by every resource.
    pub fn provider(&self) -> &Arc<dyn GitProvider> {
        &self.provider
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// The collection registered as `name`.
    pub fn resource(&self, name: &str) -> Result<Arc<dyn RecordCollection>> {
        self.resources
            .get(name)
            .ok_or_else(|| AppError::UnknownResource(name.to_string()))
    }

    /// The shared record cache.
    pub fn record_cache(&self) -> CacheHandle {
        self.caches.init(RECORD_CACHE_NAME)
    }

    pub fn caching_enabled(&self) -> bool {
        self.caches.is_enabled()
    }
}

fn open_caches(config: &ConfigHelper) -> Result<CacheRegistry> {
    let cache = &config.config().cache;
    if cache.no_cache {
        return Ok(CacheRegistry::disabled());
    }
    match cache.backend {
        CacheBackend::Memory => Ok(CacheRegistry::memory(cache.max_entries)),
        CacheBackend::Lmdb => Ok(CacheRegistry::open_lmdb(&cache.path)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSource;
    use crate::provider::MemoryProvider;
    use crate::records::{ListQuery, Record};
    use serde_json::json;

    fn config(overrides: &[(&str, &str)]) -> ConfigHelper {
        let source = ConfigSource {
            config_file: None,
            override_file: None,
            overrides: overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        ConfigHelper::new(read_config(&source).unwrap().config)
    }

    #[tokio::test]
    async fn test_app_creation() {
        let app = App::new(AppContext::default()).unwrap();
        assert!(!app.config().config().cache.no_cache);
        assert!(app.caching_enabled());
        assert_eq!(
            app.resources().names(),
            vec!["branches", "commits", "pipelines"]
        );
    }

    #[tokio::test]
    async fn test_configured_collections_are_registered() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put_file("main", "data/users.json", r#"[{"id":"1","name":"Ada"}]"#);
        provider.put_file("main", "data/posts/a.json", r#"{"title":"Hello"}"#);

        let config = config(&[
            ("collection.users.path", "data/users.json"),
            ("collection.posts.path", "data/posts"),
            ("collection.posts.kind", "directory"),
            ("collection.media.path", "static"),
            ("collection.media.kind", "raw"),
        ]);
        let app = App::with_provider(config, provider).unwrap();
        assert_eq!(
            app.resources().names(),
            vec!["branches", "commits", "media", "pipelines", "posts", "users"]
        );

        let users = app.resource("users").unwrap();
        let listed = users.list(&ListQuery::default()).await.unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.records[0].get("name"), Some(&json!("Ada")));

        let posts = app.resource("posts").unwrap();
        let post = posts.get_one("a").await.unwrap().unwrap();
        assert_eq!(post.get("title"), Some(&json!("Hello")));
    }

    #[tokio::test]
    async fn test_pipelines_of_default_branch() {
        let provider = Arc::new(MemoryProvider::new());
        provider.create_branch("dev");
        let id = provider.start_pipeline("main", "success").unwrap();
        provider.start_pipeline("dev", "failed").unwrap();

        let app = App::with_provider(config(&[]), provider.clone()).unwrap();
        let pipelines = app.resource(PIPELINES_RESOURCE).unwrap();
        let listed = pipelines.list(&ListQuery::default()).await.unwrap();
        assert_eq!(listed.total, 1);
        assert!(listed.records[0].has_id(&id));

        pipelines.list(&ListQuery::default()).await.unwrap();
        assert_eq!(provider.calls().pipeline, 1);
        assert!(pipelines.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let app = App::with_provider(config(&[]), Arc::new(MemoryProvider::new())).unwrap();
        assert!(matches!(
            app.resource("users"),
            Err(AppError::UnknownResource(name)) if name == "users"
        ));
    }

    #[tokio::test]
    async fn test_no_cache_disables_record_cache() {
        let provider = Arc::new(MemoryProvider::new());
        provider.put_file("main", "users.json", "[]");
        let app = App::with_provider(
            config(&[("cache.no_cache", "true"), ("collection.users.path", "users.json")]),
            provider.clone(),
        )
        .unwrap();
        assert!(!app.caching_enabled());

        let users = app.resource("users").unwrap();
        users
            .create(Record::from_value(json!({"name": "Grace"})).unwrap())
            .await
            .unwrap();
        users.list(&ListQuery::default()).await.unwrap();
        users.list(&ListQuery::default()).await.unwrap();

        assert!(app
            .record_cache()
            .get::<serde_json::Value>("tree.main.users.json")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_lmdb_backend_opens_under_cache_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let path_str = path.to_string_lossy().to_string();
        let app = App::with_provider(
            config(&[("cache.backend", "lmdb"), ("cache.path", path_str.as_str())]),
            Arc::new(MemoryProvider::new()),
        )
        .unwrap();

        app.record_cache().set("marker", &json!(1)).await;
        assert_eq!(app.record_cache().get::<i64>("marker").await, Some(1));
    }
}
