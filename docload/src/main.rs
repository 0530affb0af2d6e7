//! The `docload` command line.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::process::ExitCode;

fn main() -> ExitCode {
    match docload::cli::execute() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
