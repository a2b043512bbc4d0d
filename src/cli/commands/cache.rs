//! Record cache subcommands.

use clap::{Args, Subcommand};
use serde_json::Value;

use crate::app::App;
use crate::cli::{CliError, OutputSink, Result};

// =============================================================================
// Cache Subcommands
// =============================================================================

/// Record cache subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Print the cached value stored under a key.
    Get(GetArgs),

    /// Remove a key from the cache.
    Delete(DeleteArgs),
}

impl CacheCommand {
    /// Run the cache subcommand.
    pub async fn run(self, app: &App) -> Result<()> {
        if !app.caching_enabled() {
            return Err(CliError::Other("caching is disabled (--no-cache)".to_string()));
        }
        match self {
            CacheCommand::Get(args) => args.run(app).await,
            CacheCommand::Delete(args) => args.run(app).await,
        }
    }
}

// =============================================================================
// Get
// =============================================================================

/// Arguments for the cache get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Cache key, e.g. tree.main.data/users.json
    pub key: String,

    #[command(flatten)]
    pub output: OutputSink,
}

impl GetArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        let value: Option<Value> = app.record_cache().get(&self.key).await;
        match value {
            Some(value) => self.output.write(&value).await?,
            None => return Err(CliError::Other(format!("no cache entry for {}", self.key))),
        }
        Ok(())
    }
}

// =============================================================================
// Delete
// =============================================================================

/// Arguments for the cache delete command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Cache key to remove.
    pub key: String,
}

impl DeleteArgs {
    pub async fn run(self, app: &App) -> Result<()> {
        app.record_cache().delete(&self.key).await;
        Ok(())
    }
}
