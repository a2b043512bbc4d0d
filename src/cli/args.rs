//! Command-line argument definitions and helpers.

use std::path::PathBuf;

use clap::Args;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::app::AppContext;
use crate::config::ConfigSource;
use crate::records::Record;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during argument processing.
#[derive(Debug, Error)]
pub enum ArgsError {
    /// I/O error reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid argument combination.
    #[error("{0}")]
    InvalidArgs(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for argument operations.
pub type Result<T> = std::result::Result<T, ArgsError>;

// =============================================================================
// Global Arguments
// =============================================================================

/// Global arguments that apply to all commands.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Path to the main configuration file.
    #[arg(long = "config-file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Path to the configuration overrides file.
    #[arg(long = "config-file-overrides", global = true)]
    pub config_file_overrides: Option<PathBuf>,

    /// Configuration overrides in the form name=value.
    #[arg(long = "config", value_parser = parse_config_override, global = true)]
    pub config_overrides: Vec<(String, String)>,

    /// Disable caching.
    #[arg(long = "no-cache", global = true)]
    pub no_cache: bool,

    /// Repository working tree to serve, overriding `repository.root`.
    #[arg(long = "root", global = true)]
    pub root: Option<PathBuf>,
}

impl GlobalArgs {
    /// Convert to a ConfigSource for reading configuration.
    ///
    /// `--root` and `--no-cache` are applied after every `--config` override.
    pub fn to_config_source(&self) -> ConfigSource {
        let mut overrides = self.config_overrides.clone();
        if let Some(root) = &self.root {
            overrides.push((
                "repository.root".to_string(),
                root.to_string_lossy().to_string(),
            ));
        }
        if self.no_cache {
            overrides.push(("cache.no_cache".to_string(), "true".to_string()));
        }

        ConfigSource {
            config_file: self.config_file.clone(),
            override_file: self.config_file_overrides.clone(),
            overrides,
        }
    }

    /// Convert to an AppContext for creating an App.
    pub fn to_app_context(&self) -> AppContext {
        AppContext {
            config_source: self.to_config_source(),
        }
    }
}

/// Parse a config override from "name=value" format.
fn parse_config_override(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid config override '{}': expected name=value", s))?;
    Ok((name.to_string(), value.to_string()))
}

// =============================================================================
// Input/Output Helpers
// =============================================================================

/// Helper for commands that read record data from an argument, file, or stdin.
#[derive(Args, Debug, Default)]
pub struct InputSource {
    /// Read input from this file instead of an argument.
    #[arg(id = "input_file", short = 'f', long = "input-file")]
    pub file: Option<PathBuf>,
}

impl InputSource {
    /// Read the input value.
    ///
    /// If `arg_value` is provided, returns it (error if file is also set).
    /// If `file` is set, reads from the file.
    /// Otherwise, reads from stdin.
    pub async fn read(&self, arg_value: Option<&str>) -> Result<String> {
        match (arg_value, &self.file) {
            (Some(_), Some(_)) => Err(ArgsError::InvalidArgs(
                "cannot specify both a value argument and --input-file".to_string(),
            )),
            (Some(value), None) => Ok(value.to_string()),
            (None, Some(path)) => {
                let contents = tokio::fs::read_to_string(path).await?;
                Ok(contents.trim().to_string())
            }
            (None, None) => {
                let mut contents = String::new();
                tokio::io::stdin().read_to_string(&mut contents).await?;
                Ok(contents.trim().to_string())
            }
        }
    }

    /// Read the input as a JSON object.
    pub async fn read_record(&self, arg_value: Option<&str>) -> Result<Record> {
        let text = self.read(arg_value).await?;
        parse_record(&text)
    }
}

/// Parse record data, which must be a JSON object.
pub fn parse_record(text: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Record::from_value(value)
        .ok_or_else(|| ArgsError::InvalidArgs("record data must be a JSON object".to_string()))
}

/// Helper for commands that write output to a file or stdout.
#[derive(Args, Debug, Default)]
pub struct OutputSink {
    /// Write output to this file instead of stdout.
    #[arg(id = "output_file", short = 'o', long = "output-file")]
    pub file: Option<PathBuf>,
}

impl OutputSink {
    /// Write a string value to the output.
    pub async fn write_str(&self, value: &str) -> Result<()> {
        match &self.file {
            Some(path) => {
                tokio::fs::write(path, value).await?;
            }
            None => {
                tokio::io::stdout().write_all(value.as_bytes()).await?;
                tokio::io::stdout().write_all(b"\n").await?;
            }
        }
        Ok(())
    }

    /// Write a value to the output as pretty-printed JSON.
    pub async fn write<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let output = serde_json::to_string_pretty(value)?;
        self.write_str(&output).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_override() {
        assert_eq!(
            parse_config_override("cache.path=/tmp/a=b").unwrap(),
            ("cache.path".to_string(), "/tmp/a=b".to_string())
        );
        assert!(parse_config_override("cache.path").is_err());
    }

    #[test]
    fn test_root_and_no_cache_become_overrides() {
        let args = GlobalArgs {
            config_overrides: vec![("repository.root".to_string(), "/a".to_string())],
            no_cache: true,
            root: Some(PathBuf::from("/b")),
            ..Default::default()
        };
        let source = args.to_config_source();
        assert_eq!(
            source.overrides,
            vec![
                ("repository.root".to_string(), "/a".to_string()),
                ("repository.root".to_string(), "/b".to_string()),
                ("cache.no_cache".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_record() {
        let record = parse_record(r#"{"id": 3, "name": "Ada"}"#).unwrap();
        assert_eq!(record.id().as_deref(), Some("3"));
        assert!(matches!(parse_record("[1, 2]"), Err(ArgsError::InvalidArgs(_))));
        assert!(matches!(parse_record("{"), Err(ArgsError::Json(_))));
    }

    #[tokio::test]
    async fn test_input_source_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{\"name\": \"Grace\"}\n").unwrap();

        let input = InputSource { file: Some(path) };
        let record = input.read_record(None).await.unwrap();
        assert_eq!(record.get("name"), Some(&serde_json::json!("Grace")));
        assert!(input.read(Some("{}")).await.is_err());
    }
}
