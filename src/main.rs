#![forbid(unsafe_code)]

//! storage-sage — filesystem-cleanup daemon entry point.

use clap::Parser;
use storage_sage::cli::{Cli, run};

fn main() {
    let args = Cli::parse();
    if let Err(err) = run(&args) {
        eprintln!("storage-sage: {err}");
        std::process::exit(err.exit_code());
    }
}
