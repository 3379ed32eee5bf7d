//! # gitdep CLI
//!
//! This is the binary entry point for the `gitdep` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Executing the appropriate command based on the parsed arguments.
//! - Printing every error as one `error:` line on stderr and exiting with
//!   status 1 (usage errors exit with 2, as clap does).
//!
//! The core application logic is defined in the `lib.rs` library crate, so the
//! binary is a thin wrapper around the reusable library functionality.

mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            for line in diagnostics(error) {
                eprintln!("error: {}", line);
            }
            ExitCode::from(1)
        }
    }
}

/// One line per underlying error; collected library errors are flattened.
fn diagnostics(error: anyhow::Error) -> Vec<String> {
    match error.downcast::<gitdep::error::Error>() {
        Ok(error) => error
            .into_diagnostics()
            .iter()
            .map(ToString::to_string)
            .collect(),
        Err(other) => vec![format!("{:#}", other)],
    }
}
