//! CLI commands
//!
//! Thin glue between parsed arguments and the runtime; subsystems are
//! never reached directly from here.

use std::fs;
use std::path::Path;

use crate::core::runtime::{CoreRuntime, RuntimeConfig};
use crate::core::types::ConnectionMode;

use super::args::{Command, Mode};
use super::errors::{CliError, CliResult};

/// Run one parsed command.
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Init {
            schema_search_dir,
            data_search_dir,
        } => init(&schema_search_dir, &data_search_dir),
        Command::Start {
            schema_search_dir,
            data_search_dir,
            mode,
            workers,
            queue_capacity,
        } => {
            let mut config = RuntimeConfig::new(schema_search_dir, data_search_dir);
            config.worker_count = workers;
            config.queue_capacity = queue_capacity;
            if let Mode::Daemon = mode {
                config = config.daemon();
            } else {
                config.mode = ConnectionMode::Local;
            }
            start(config)
        }
    }
}

/// Create the directory layout.
pub fn init(schema_dir: &Path, data_dir: &Path) -> CliResult<()> {
    for dir in [schema_dir, data_dir, &data_dir.join("persist")] {
        fs::create_dir_all(dir)
            .map_err(|e| CliError::Init(format!("cannot create '{}': {}", dir.display(), e)))?;
    }
    Ok(())
}

/// Boot the runtime and serve until the process is interrupted.
pub fn start(config: RuntimeConfig) -> CliResult<()> {
    let _runtime = CoreRuntime::start(config)?;
    // the worker pool serves in the background; the transport that
    // feeds the queue is an external collaborator
    loop {
        std::thread::park();
    }
}
