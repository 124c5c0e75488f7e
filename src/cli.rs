//! # CLI Argument Parsing and Command Dispatch
//!
//! Defines the command-line interface for the `plasma-compose` tool using the
//! `clap` library: the top-level structure with global logging arguments, the
//! available subcommands, and dispatch to the command implementations under
//! `src/commands/`.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use crate::commands;

/// Plasma Compose - Compose a platform from remote packages
#[derive(Parser, Debug)]
#[command(name = "plasma-compose")]
#[command(
    version,
    about,
    long_about = "Plasma Compose - Overlay a platform directory with remote packages"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Increase output verbosity (can be repeated: --verbose --verbose)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Suppress output except errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compose the platform filesystem (files & dirs)
    Compose(commands::compose::ComposeArgs),
}

impl Cli {
    /// Execute the parsed CLI command
    pub fn execute(self) -> Result<()> {
        self.init_logger()?;

        match self.command {
            Commands::Compose(args) => commands::compose::execute(args),
        }
    }

    /// Initialize the logger with the specified log level
    fn init_logger(&self) -> Result<()> {
        let log_level = self.parse_log_level()?;

        env_logger::Builder::from_default_env()
            .filter_level(log_level)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

        Ok(())
    }

    /// Parse the log level, considering --verbose and --quiet flags
    fn parse_log_level(&self) -> Result<LevelFilter> {
        if self.quiet {
            return Ok(LevelFilter::Error);
        }

        if self.verbose > 0 {
            return Ok(match self.verbose {
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            });
        }

        match self.log_level.to_lowercase().as_str() {
            "error" => Ok(LevelFilter::Error),
            "warn" => Ok(LevelFilter::Warn),
            "info" => Ok(LevelFilter::Info),
            "debug" => Ok(LevelFilter::Debug),
            "trace" => Ok(LevelFilter::Trace),
            "off" => Ok(LevelFilter::Off),
            _ => Err(anyhow::anyhow!(
                "Invalid log level: '{}'. Valid options are: error, warn, info, debug, trace, off",
                self.log_level
            )),
        }
    }
}
