//! Dapr CLI library

pub mod browser;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod resolver;
pub mod status;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Dapr - distributed application runtime CLI
#[derive(Parser, Debug)]
#[command(name = "dapr")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start Dapr dashboard
    Dashboard(commands::dashboard::DashboardArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Dashboard(args) => commands::dashboard::run(args).await,
        }
    }
}
