//! FDB worker
//!
//! Serves one FDB library to a parent process over stdin/stdout.
//!
//! A process can initialise only one copy of the library. When a second,
//! different library is requested, the parent starts this worker with
//! `--library <path>` and forwards every call as a framed message.
//! Standard output carries the protocol, so logging goes to stderr.

use clap::Parser;
use fdb_core::{serve, serve_unavailable, NativeApi, NativeLibrary};
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Serves an FDB library over stdin/stdout.
#[derive(Parser)]
#[command(name = "fdb-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the library to load
    #[arg(long)]
    library: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut reader = BufReader::new(io::stdin().lock());
    let mut writer = BufWriter::new(io::stdout().lock());

    let result = match NativeLibrary::load(Some(&cli.library)) {
        Ok(library) => {
            info!(
                path = %library.path().display(),
                version = %library.version_str(),
                "worker serving FDB library"
            );
            serve(&library as &dyn NativeApi, &mut reader, &mut writer)
        }
        Err(e) => {
            // Keep answering so the parent sees the load error on its first call.
            error!(library = %cli.library.display(), error = %e, "cannot load FDB library");
            serve_unavailable(&e, &mut reader, &mut writer)
        }
    };

    match result {
        Ok(()) => {
            debug!("worker exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "worker failed");
            ExitCode::FAILURE
        }
    }
}
