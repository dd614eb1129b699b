//! Command-line interface
//!
//! - init: create the directory layout
//! - start: boot the store and serve

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command, Mode};
pub use commands::{init, run_command, start};
pub use errors::{CliError, CliResult};
