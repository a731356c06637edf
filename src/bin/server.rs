//! livedoc server binary.
//! Run with: cargo run --bin livedoc-server

use std::process::ExitCode;

use livedoc::start_livedoc;

fn main() -> ExitCode {
    start_livedoc::run()
}
