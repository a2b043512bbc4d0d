//! Configuration helper for interpreting config values.
//!
//! The `ConfigHelper` wraps a `Config` and turns its raw values into the
//! durations, widths and collection options the rest of the crate consumes.

use std::sync::Arc;
use std::time::Duration;

use super::{CollectionConfig, Config};
use crate::collection::CollectionOptions;
use crate::records::JsonCodec;

/// Helper for interpreting configuration values.
#[derive(Debug, Clone)]
pub struct ConfigHelper {
    config: Config,
}

impl ConfigHelper {
    /// Create a new ConfigHelper wrapping the given config.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get a reference to the underlying config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the helper and return the underlying config.
    pub fn into_config(self) -> Config {
        self.config
    }

    /// Bound applied to every provider call.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.config.network.timeout_ms)
    }

    /// Number of file reads allowed in flight at once. Never zero.
    pub fn read_concurrency(&self) -> usize {
        self.config.network.max_concurrent_requests.max(1)
    }

    /// Collection options for a configured collection.
    pub fn collection_options(&self, collection: &CollectionConfig) -> CollectionOptions {
        CollectionOptions::new(collection.path.clone())
            .with_ref(self.config.collection_ref(collection))
            .with_strategy(collection.cache_behavior)
            .with_codec(Arc::new(JsonCodec::new(collection.indent)))
    }
}

impl From<Config> for ConfigHelper {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caches::InvalidationStrategy;
    use crate::config::{read_config, CollectionKind, ConfigSource};

    fn helper(overrides: &[(&str, &str)]) -> ConfigHelper {
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

    #[test]
    fn test_network_values() {
        let helper = helper(&[
            ("network.timeout_ms", "1500"),
            ("network.max_concurrent_requests", "0"),
        ]);
        assert_eq!(helper.provider_timeout(), Duration::from_millis(1500));
        assert_eq!(helper.read_concurrency(), 1);
    }

    #[test]
    fn test_collection_options() {
        let helper = helper(&[
            ("repository.ref", "live"),
            ("collection.users.path", "data/users.json"),
            ("collection.users.cache_behavior", "content"),
            ("collection.users.indent", "0"),
        ]);
        let users = &helper.config().collections["users"];
        assert_eq!(users.kind, CollectionKind::File);

        let options = helper.collection_options(users);
        assert_eq!(options.path, "data/users.json");
        assert_eq!(options.git_ref, "live");
        assert_eq!(options.strategy, InvalidationStrategy::ContentFingerprint);
        assert_eq!(options.codec.extension(), "json");
    }
}
