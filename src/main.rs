//! yangstore entry point
//!
//! main parses arguments and dispatches to CLI commands; it never calls
//! subsystems directly.

use std::process;

use yangstore::cli::{run_command, Cli};

fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = run_command(cli.command) {
        let error_json = serde_json::json!({
            "status": "error",
            "code": e.code_str(),
            "message": e.message(),
        });
        eprintln!("{}", error_json);
        process::exit(1);
    }
}
