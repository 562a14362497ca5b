//! `cai` entry point. Parses arguments, dispatches to the subsystem the
//! chosen subcommand needs, and turns the result into a process exit code.
//! This is the only place that calls `std::process::exit`-adjacent APIs.

use std::process::ExitCode;

use clap::Parser;

use containai::cli::{self, Cli};
use containai::color;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli::dispatch(cli) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            color::log_error(&e.render());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
