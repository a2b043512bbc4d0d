//! Configuration file reading and parsing.
//!
//! This module handles locating, reading, and parsing INI-format configuration files,
//! with support for layered overrides.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use thiserror::Error;

use super::{
    CacheBackend, CacheConfig, CollectionConfig, CollectionKind, Config, NetworkConfig,
    RepositoryConfig,
};
use crate::caches::{InvalidationStrategy, DEFAULT_MAX_ENTRIES};
use crate::records::DEFAULT_INDENT;
use crate::util::DEFAULT_CONCURRENCY;

// =============================================================================
// Constants - Default Values
// =============================================================================

const DEFAULT_CACHE_PATH: &str = "/tmp/gitrecords-cache";
const DEFAULT_CACHE_NO_CACHE: bool = false;
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_REPOSITORY_ROOT: &str = ".";
const DEFAULT_REF: &str = "main";

const ENV_CONFIG_FILE: &str = "GITRECORDS_CONFIG_FILE";
const DEFAULT_CONFIG_FILENAME: &str = ".gitrecords";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid integer '{value}': {source}")]
    InvalidInteger {
        value: String,
        source: std::num::ParseIntError,
    },

    #[error("invalid boolean '{value}' for key '{key}'")]
    InvalidBoolean { key: String, value: String },

    #[error("invalid value '{value}' for key '{key}': expected one of {expected}")]
    InvalidChoice {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("invalid override key '{key}': {message}")]
    InvalidOverrideKey { key: String, message: String },

    #[error("missing required field '{field}' in section '{section}'")]
    MissingRequiredField { section: String, field: String },
}

/// Result type for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// =============================================================================
// ConfigSource
// =============================================================================

/// Specifies how to locate and layer configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Explicit config file path from CLI. If specified and doesn't exist, error.
    /// If None, fall back to GITRECORDS_CONFIG_FILE env var, then ~/.gitrecords.
    pub config_file: Option<PathBuf>,

    /// Additional override config file (layered on top of base config).
    pub override_file: Option<PathBuf>,

    /// Individual key=value overrides (applied last).
    /// Keys use dot-notation: "cache.path", "collection.users.path"
    pub overrides: Vec<(String, String)>,
}

// =============================================================================
// Value Parsing
// =============================================================================

fn parse_bool_value(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBoolean {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_integer<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidInteger {
            value: value.to_string(),
            source,
        })
}

fn parse_backend(key: &str, value: &str) -> Result<CacheBackend> {
    match value.to_lowercase().as_str() {
        "memory" => Ok(CacheBackend::Memory),
        "lmdb" => Ok(CacheBackend::Lmdb),
        _ => Err(ConfigError::InvalidChoice {
            key: key.to_string(),
            value: value.to_string(),
            expected: "memory, lmdb",
        }),
    }
}

fn parse_kind(key: &str, value: &str) -> Result<CollectionKind> {
    match value.to_lowercase().as_str() {
        "file" => Ok(CollectionKind::File),
        "directory" => Ok(CollectionKind::Directory),
        "raw" => Ok(CollectionKind::Raw),
        _ => Err(ConfigError::InvalidChoice {
            key: key.to_string(),
            value: value.to_string(),
            expected: "file, directory, raw",
        }),
    }
}

fn parse_cache_behavior(key: &str, value: &str) -> Result<InvalidationStrategy> {
    match value.to_lowercase().as_str() {
        "branch" => Ok(InvalidationStrategy::Branch),
        "content" => Ok(InvalidationStrategy::ContentFingerprint),
        _ => Err(ConfigError::InvalidChoice {
            key: key.to_string(),
            value: value.to_string(),
            expected: "branch, content",
        }),
    }
}

// =============================================================================
// Config File Resolution
// =============================================================================

/// Information about how the config file was resolved.
#[derive(Debug)]
pub struct ResolvedConfigFile {
    /// The path to the config file, if one was found.
    pub path: Option<PathBuf>,
    /// Warning message if env var pointed to nonexistent file.
    pub warning: Option<String>,
}

/// Resolve which config file to use based on the ConfigSource and environment.
fn resolve_config_file(source: &ConfigSource) -> Result<ResolvedConfigFile> {
    if let Some(ref path) = source.config_file {
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path.clone()),
                warning: None,
            });
        }
        return Err(ConfigError::FileNotFound(path.clone()));
    }

    if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(path),
                warning: None,
            });
        }
        // Warn but continue with defaults
        return Ok(ResolvedConfigFile {
            path: None,
            warning: Some(format!(
                "config file specified by {} does not exist: {}",
                ENV_CONFIG_FILE, env_path
            )),
        });
    }

    if let Some(home) = home_dir() {
        let default_path = home.join(DEFAULT_CONFIG_FILENAME);
        if default_path.exists() {
            return Ok(ResolvedConfigFile {
                path: Some(default_path),
                warning: None,
            });
        }
    }

    Ok(ResolvedConfigFile {
        path: None,
        warning: None,
    })
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

// =============================================================================
// Default Config
// =============================================================================

/// Create a Config with all default values.
fn default_config() -> Config {
    Config {
        cache: CacheConfig {
            path: PathBuf::from(DEFAULT_CACHE_PATH),
            no_cache: DEFAULT_CACHE_NO_CACHE,
            backend: CacheBackend::Memory,
            max_entries: DEFAULT_MAX_ENTRIES,
        },
        network: NetworkConfig {
            max_concurrent_requests: DEFAULT_CONCURRENCY,
            timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
        },
        repository: RepositoryConfig {
            root: PathBuf::from(DEFAULT_REPOSITORY_ROOT),
            git_ref: DEFAULT_REF.to_string(),
        },
        collections: BTreeMap::new(),
    }
}

fn empty_collection() -> CollectionConfig {
    CollectionConfig {
        path: String::new(),
        kind: CollectionKind::default(),
        git_ref: None,
        cache_behavior: InvalidationStrategy::default(),
        indent: DEFAULT_INDENT,
    }
}

// =============================================================================
// INI Parsing
// =============================================================================

/// Apply an INI file's contents to a Config, layering on top of existing values.
///
/// Keys go through the same setters as `--config` overrides.
fn apply_ini_to_config(config: &mut Config, ini: &Ini) -> Result<()> {
    for section_name in ini.sections() {
        let Some(entries) = ini.get_map_ref().get(&section_name) else {
            continue;
        };
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();

        for key in keys {
            let Some(value) = ini.get(&section_name, key) else {
                continue;
            };
            apply_section_value(config, &section_name, key, &value)?;
        }

        if let Some(name) = section_name
            .strip_prefix("collection.")
            .filter(|name| !name.is_empty())
        {
            let has_path = config
                .collections
                .get(name)
                .is_some_and(|c| !c.path.is_empty());
            if !has_path {
                return Err(ConfigError::MissingRequiredField {
                    section: section_name.clone(),
                    field: "path".to_string(),
                });
            }
        }
    }

    Ok(())
}

fn apply_section_value(config: &mut Config, section: &str, key: &str, value: &str) -> Result<()> {
    match section {
        "cache" => apply_cache_override(config, key, value),
        "network" => apply_network_override(config, key, value),
        "repository" => apply_repository_override(config, key, value),
        _ => match section.strip_prefix("collection.") {
            Some(name) if !name.is_empty() => apply_collection_override(config, name, key, value),
            _ => {
                tracing::debug!("ignoring unknown config section [{}]", section);
                Ok(())
            }
        },
    }
}

/// Load and parse an INI file.
fn load_ini(path: &Path) -> Result<Ini> {
    let mut ini = Ini::new();
    ini.load(path).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e,
    })?;
    Ok(ini)
}

// =============================================================================
// Override Application
// =============================================================================

/// Apply a single key=value override to the config.
fn apply_override(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = key.splitn(3, '.').collect();

    match parts.as_slice() {
        // cache.path, cache.no_cache, cache.backend, cache.max_entries
        ["cache", param] => apply_cache_override(config, param, value),

        // network.max_concurrent_requests, network.timeout_ms
        ["network", param] => apply_network_override(config, param, value),

        // repository.root, repository.ref
        ["repository", param] => apply_repository_override(config, param, value),

        // collection.name.param
        ["collection", name, param] if !name.is_empty() => {
            apply_collection_override(config, name, param, value)
        }

        _ => Err(ConfigError::InvalidOverrideKey {
            key: key.to_string(),
            message: "unrecognized key format".to_string(),
        }),
    }
}

fn apply_cache_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    match param {
        "path" => config.cache.path = PathBuf::from(value),
        "no_cache" | "no-cache" => config.cache.no_cache = parse_bool_value(param, value)?,
        "backend" => config.cache.backend = parse_backend(param, value)?,
        "max_entries" => config.cache.max_entries = parse_integer(value)?,
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("cache.{}", param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

fn apply_network_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    match param {
        "max_concurrent_requests" => {
            config.network.max_concurrent_requests = parse_integer(value)?
        }
        "timeout_ms" => config.network.timeout_ms = parse_integer(value)?,
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("network.{}", param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

fn apply_repository_override(config: &mut Config, param: &str, value: &str) -> Result<()> {
    match param {
        "root" => config.repository.root = PathBuf::from(value),
        "ref" => config.repository.git_ref = value.to_string(),
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("repository.{}", param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

fn apply_collection_override(
    config: &mut Config,
    name: &str,
    param: &str,
    value: &str,
) -> Result<()> {
    let collection = config
        .collections
        .entry(name.to_string())
        .or_insert_with(empty_collection);

    match param {
        "path" => collection.path = value.trim_matches('/').to_string(),
        "kind" => collection.kind = parse_kind(param, value)?,
        "ref" => collection.git_ref = Some(value.to_string()),
        "cache_behavior" => collection.cache_behavior = parse_cache_behavior(param, value)?,
        "indent" => collection.indent = parse_integer(value)?,
        _ => {
            return Err(ConfigError::InvalidOverrideKey {
                key: format!("collection.{}.{}", name, param),
                message: "unknown parameter".to_string(),
            })
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

/// Result of reading configuration, including any warnings.
#[derive(Debug)]
pub struct ConfigResult {
    /// The parsed configuration.
    pub config: Config,
    /// Any warnings generated during config loading.
    pub warnings: Vec<String>,
}

/// Read and parse configuration from the specified sources.
///
/// Configuration is layered in this order:
/// 1. Built-in defaults
/// 2. Base config file (from CLI, env var, or ~/.gitrecords)
/// 3. Override config file (if specified)
/// 4. Individual overrides (applied last)
pub fn read_config(source: &ConfigSource) -> Result<ConfigResult> {
    let mut warnings = Vec::new();

    let mut config = default_config();

    let resolved = resolve_config_file(source)?;
    if let Some(warning) = resolved.warning {
        warnings.push(warning);
    }
    if let Some(ref path) = resolved.path {
        let ini = load_ini(path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    if let Some(ref override_path) = source.override_file {
        if !override_path.exists() {
            return Err(ConfigError::FileNotFound(override_path.clone()));
        }
        let ini = load_ini(override_path)?;
        apply_ini_to_config(&mut config, &ini)?;
    }

    for (key, value) in &source.overrides {
        apply_override(&mut config, key, value)?;
    }

    // A collection introduced only by overrides still needs a path.
    if let Some((name, _)) = config.collections.iter().find(|(_, c)| c.path.is_empty()) {
        return Err(ConfigError::MissingRequiredField {
            section: format!("collection.{}", name),
            field: "path".to_string(),
        });
    }

    Ok(ConfigResult { config, warnings })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.cache.path, PathBuf::from("/tmp/gitrecords-cache"));
        assert!(!config.cache.no_cache);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.network.max_concurrent_requests, 5);
        assert_eq!(config.network.timeout_ms, 30_000);
        assert_eq!(config.repository.git_ref, "main");
        assert!(config.collections.is_empty());
    }

    #[test]
    fn test_apply_override_cache() {
        let mut config = default_config();
        apply_override(&mut config, "cache.path", "/custom/path").unwrap();
        assert_eq!(config.cache.path, PathBuf::from("/custom/path"));

        apply_override(&mut config, "cache.no_cache", "true").unwrap();
        assert!(config.cache.no_cache);

        apply_override(&mut config, "cache.backend", "LMDB").unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Lmdb);

        assert!(matches!(
            apply_override(&mut config, "cache.backend", "redis"),
            Err(ConfigError::InvalidChoice { .. })
        ));
    }

    #[test]
    fn test_apply_override_network() {
        let mut config = default_config();
        apply_override(&mut config, "network.max_concurrent_requests", "12").unwrap();
        apply_override(&mut config, "network.timeout_ms", "500").unwrap();
        assert_eq!(config.network.max_concurrent_requests, 12);
        assert_eq!(config.network.timeout_ms, 500);

        assert!(matches!(
            apply_override(&mut config, "network.timeout_ms", "soon"),
            Err(ConfigError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn test_apply_override_collection() {
        let mut config = default_config();
        apply_override(&mut config, "collection.users.path", "/data/users.json/").unwrap();
        apply_override(&mut config, "collection.users.ref", "staging").unwrap();
        apply_override(&mut config, "collection.users.cache_behavior", "content").unwrap();

        let users = config.collections.get("users").unwrap();
        assert_eq!(users.path, "data/users.json");
        assert_eq!(users.kind, CollectionKind::File);
        assert_eq!(users.cache_behavior, InvalidationStrategy::ContentFingerprint);
        assert_eq!(config.collection_ref(users), "staging");
    }

    #[test]
    fn test_apply_override_unknown_keys() {
        let mut config = default_config();
        assert!(matches!(
            apply_override(&mut config, "memory.max", "1"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
        assert!(matches!(
            apply_override(&mut config, "collection.users.colour", "red"),
            Err(ConfigError::InvalidOverrideKey { .. })
        ));
    }

    #[test]
    fn test_parse_ini_config() {
        let mut ini = Ini::new();
        ini.read(
            r#"
[cache]
path = /custom/cache
no-cache = true
backend = lmdb

[network]
max_concurrent_requests = 8

[repository]
root = /srv/site
ref = production

[collection.posts]
path = content/posts
kind = directory
indent = 4

[collection.media]
path = static/media
kind = raw
ref = assets
"#
            .to_string(),
        )
        .unwrap();

        let mut config = default_config();
        apply_ini_to_config(&mut config, &ini).unwrap();

        assert_eq!(config.cache.path, PathBuf::from("/custom/cache"));
        assert!(config.cache.no_cache);
        assert_eq!(config.cache.backend, CacheBackend::Lmdb);
        assert_eq!(config.network.max_concurrent_requests, 8);
        assert_eq!(config.repository.root, PathBuf::from("/srv/site"));

        let posts = config.collections.get("posts").unwrap();
        assert_eq!(posts.kind, CollectionKind::Directory);
        assert_eq!(posts.indent, 4);
        assert_eq!(config.collection_ref(posts), "production");

        let media = config.collections.get("media").unwrap();
        assert_eq!(media.kind, CollectionKind::Raw);
        assert_eq!(config.collection_ref(media), "assets");
    }

    #[test]
    fn test_collection_without_path_rejected() {
        let mut ini = Ini::new();
        ini.read("[collection.users]\nkind = file\n".to_string())
            .unwrap();

        let mut config = default_config();
        assert!(matches!(
            apply_ini_to_config(&mut config, &ini),
            Err(ConfigError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_read_config_layers_files_and_overrides() {
        let base = write_config("[repository]\nroot = /base\n\n[collection.users]\npath = users.json\n");
        let overlay = write_config("[repository]\nroot = /overlay\n");

        let source = ConfigSource {
            config_file: Some(base.path().to_path_buf()),
            override_file: Some(overlay.path().to_path_buf()),
            overrides: vec![("collection.users.indent".to_string(), "0".to_string())],
        };
        let result = read_config(&source).unwrap();

        assert_eq!(result.config.repository.root, PathBuf::from("/overlay"));
        assert_eq!(result.config.collections["users"].indent, 0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_read_config_missing_explicit_file() {
        let source = ConfigSource {
            config_file: Some(PathBuf::from("/nonexistent/gitrecords.ini")),
            ..Default::default()
        };
        assert!(matches!(
            read_config(&source),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_override_only_collection_needs_path() {
        let base = write_config("");
        let source = ConfigSource {
            config_file: Some(base.path().to_path_buf()),
            override_file: None,
            overrides: vec![("collection.tags.kind".to_string(), "directory".to_string())],
        };
        assert!(matches!(
            read_config(&source),
            Err(ConfigError::MissingRequiredField { .. })
        ));
    }
}
