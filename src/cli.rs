//! CLI definitions for Ember.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Ember CLI.
#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Classic block game server")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ember.toml", global = true, env = "EMBER_CONFIG")]
    pub config: PathBuf,

    /// Working directory
    #[arg(short, long, global = true)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Run the server in foreground (default)
    Run {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}
