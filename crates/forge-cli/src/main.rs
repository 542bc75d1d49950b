//! # novelforge CLI
//!
//! Command-line interface for NovelForge.
//!
//! This binary provides human-friendly access to `forge-core` functionality.
//! Run `novelforge --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
