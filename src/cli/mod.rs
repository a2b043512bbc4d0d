//! Command-line interface for gitrecords.

pub mod args;
mod commands;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::app::{App, AppError};
use crate::collection::CollectionError;

pub use args::{GlobalArgs, InputSource, OutputSink};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during CLI execution.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument processing error.
    #[error("{0}")]
    Args(#[from] args::ArgsError),

    /// App error.
    #[error("{0}")]
    App(#[from] AppError),

    /// Collection error.
    #[error("{0}")]
    Collection(#[from] CollectionError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

// =============================================================================
// CLI Definition
// =============================================================================

/// grec - CRUD over JSON records committed to a Git branch.
#[derive(Parser, Debug)]
#[command(name = "grec", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the records of a resource.
    List(commands::records::ListArgs),

    /// Get records by id.
    Get(commands::records::GetArgs),

    /// Create a record.
    Create(commands::records::CreateArgs),

    /// Merge fields into a record.
    Update(commands::records::UpdateArgs),

    /// Delete a record.
    Delete(commands::records::DeleteArgs),

    /// Delete several records in one commit.
    #[command(name = "delete-many")]
    DeleteMany(commands::records::DeleteManyArgs),

    /// Record cache operations.
    Cache {
        #[command(subcommand)]
        command: commands::cache::CacheCommand,
    },
}

// =============================================================================
// CLI Execution
// =============================================================================

impl Cli {
    /// Parse command-line arguments and return the CLI instance.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let app = App::new(self.global.to_app_context())?;

        match self.command {
            Command::List(args) => args.run(&app).await,
            Command::Get(args) => args.run(&app).await,
            Command::Create(args) => args.run(&app).await,
            Command::Update(args) => args.run(&app).await,
            Command::Delete(args) => args.run(&app).await,
            Command::DeleteMany(args) => args.run(&app).await,
            Command::Cache { command } => command.run(&app).await,
        }
    }
}

/// Main entry point for the CLI.
pub async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.run().await
}
