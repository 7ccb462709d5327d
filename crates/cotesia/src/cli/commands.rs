//! Subcommand definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Run the release controller.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Force actuator simulation mode regardless of configuration
    #[arg(long)]
    pub simulate: bool,
}

/// Inspect stored flights.
#[derive(Debug, Subcommand)]
pub enum FlightsCommand {
    /// List all stored flights
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one flight's metadata
    Show {
        /// Global flight number
        number: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete one flight directory
    Delete {
        /// Global flight number
        number: u32,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Decrypt a sealed flight log.
#[derive(Debug, Args)]
pub struct DecryptCommand {
    /// Path to the sealed log file
    pub log: PathBuf,

    /// Key file (defaults to the configured log key path)
    #[arg(short, long, value_name = "FILE")]
    pub key: Option<PathBuf>,

    /// Output path (defaults to the log path without its .enc suffix)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

/// View or validate configuration.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },
}
