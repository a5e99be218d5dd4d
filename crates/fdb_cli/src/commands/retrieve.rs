//! Retrieve command implementation.

use super::{CliError, CliResult, Session};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Runs the retrieve command.
pub fn run(session: &Session, request: &str, output: Option<&Path>) -> CliResult<()> {
    let fdb = session.open()?;
    let mut reader = fdb.retrieve(request)?;

    let copied = match output {
        Some(path) => {
            let file = File::create(path).map_err(|source| CliError::File {
                path: path.to_path_buf(),
                source,
            })?;
            let mut out = BufWriter::new(file);
            let copied = io::copy(&mut reader, &mut out)?;
            out.flush()?;
            copied
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut reader, &mut out)?
        }
    };
    reader.close()?;

    info!(bytes = copied, "retrieved");
    Ok(())
}
