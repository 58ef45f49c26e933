//! Command-line interface for audio-profiles
//!
//! Handles argument parsing and logging configuration.

use audio_profiles::models::DuplicatePolicy;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// audio-profiles - save and restore per-application volume levels
#[derive(Parser, Debug)]
#[command(name = "audio-profiles")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Profile store to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Save the current application and master volumes as a profile
    Capture {
        name: String,
        /// How to combine several sessions of the same application
        #[arg(long, value_name = "POLICY")]
        duplicates: Option<DuplicatePolicy>,
    },
    /// Restore a saved profile onto the running applications
    Apply { name: String },
    /// Delete a saved profile
    Delete { name: String },
    /// List saved profiles
    List,
    /// Show the levels stored in a profile
    Show { name: String },
    /// List the audio sessions that are playing right now
    Sessions,
    /// Show or change persistent settings
    Config {
        /// Default policy for combining duplicate sessions
        #[arg(long, value_name = "POLICY")]
        duplicate_policy: Option<DuplicatePolicy>,
        /// Default location of the profile store
        #[arg(long, value_name = "PATH")]
        store_path: Option<PathBuf>,
    },
}

impl Command {
    /// The verb to name when this command fails
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Capture { .. } => "save",
            Command::Apply { .. } => "load",
            Command::Delete { .. } => "delete",
            Command::List => "list",
            Command::Show { .. } => "show",
            Command::Sessions => "read",
            Command::Config { .. } => "configure",
        }
    }
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("audio_profiles", args.log_level());

    if args.verbose >= 4 {
        builder.filter_level(args.log_level());
    }

    builder.format_timestamp_millis().init();
}
