//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// yangstore - a YANG-model-driven configuration and operational data store
#[derive(Debug, Parser)]
#[command(name = "yangstore", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// How the store is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Load all installed modules at startup, enforce file ACLs
    Daemon,
    /// Load modules lazily, single-user
    Local,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the schema and data directory layout
    Init {
        /// Directory of schema documents
        #[arg(long, default_value = "schemas")]
        schema_search_dir: PathBuf,
        /// Directory of datastore files
        #[arg(long, default_value = "data")]
        data_search_dir: PathBuf,
    },
    /// Boot the store and serve until interrupted
    Start {
        /// Directory of schema documents
        #[arg(long, default_value = "schemas")]
        schema_search_dir: PathBuf,
        /// Directory of datastore files
        #[arg(long, default_value = "data")]
        data_search_dir: PathBuf,
        /// Connection mode
        #[arg(long, value_enum, default_value_t = Mode::Daemon)]
        mode: Mode,
        /// Worker pool size
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Request queue capacity
        #[arg(long, default_value_t = 1024)]
        queue_capacity: usize,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
