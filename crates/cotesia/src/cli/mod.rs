//! Command-line interface for the cotesia controller.
//!
//! This module provides the CLI structure and command definitions for
//! the `cotesia` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, DecryptCommand, FlightsCommand, RunCommand};

/// cotesia - Unattended aerial release controller
///
/// Monitors a GPS-tracked vehicle, detects the flight phases of a
/// release mission, drives the two release servos, and persists an
/// auditable record of every flight.
#[derive(Debug, Parser)]
#[command(name = "cotesia")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the release controller
    Run(RunCommand),

    /// Inspect stored flights
    #[command(subcommand)]
    Flights(FlightsCommand),

    /// Decrypt a sealed flight log
    Decrypt(DecryptCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_valid() {
        Cli::command().debug_assert();
        assert_eq!(Cli::command().get_name(), "cotesia");
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["cotesia", "run", "--simulate"]);
        match cli.command {
            Command::Run(cmd) => assert!(cmd.simulate),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_flights_show() {
        let cli = Cli::parse_from(["cotesia", "flights", "show", "12", "--json"]);
        match cli.command {
            Command::Flights(FlightsCommand::Show { number, json }) => {
                assert_eq!(number, 12);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_decrypt_with_key() {
        let cli = Cli::parse_from([
            "cotesia",
            "decrypt",
            "/data/LOG_COMPLETO.txt.enc",
            "--key",
            "/home/op/.cotesia_log.key",
        ]);
        match cli.command {
            Command::Decrypt(cmd) => {
                assert_eq!(cmd.log, PathBuf::from("/data/LOG_COMPLETO.txt.enc"));
                assert_eq!(cmd.key, Some(PathBuf::from("/home/op/.cotesia_log.key")));
                assert!(cmd.output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_verbosity_flags() {
        let quiet = Cli::parse_from(["cotesia", "-q", "config", "path"]);
        assert_eq!(quiet.verbosity(), crate::logging::Verbosity::Quiet);

        let normal = Cli::parse_from(["cotesia", "config", "path"]);
        assert_eq!(normal.verbosity(), crate::logging::Verbosity::Normal);

        let verbose = Cli::parse_from(["cotesia", "-v", "config", "path"]);
        assert_eq!(verbose.verbosity(), crate::logging::Verbosity::Verbose);

        let trace = Cli::parse_from(["cotesia", "-vv", "config", "path"]);
        assert_eq!(trace.verbosity(), crate::logging::Verbosity::Trace);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["cotesia", "flights", "list", "-c", "/tmp/alt.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/alt.toml")));
    }
}
