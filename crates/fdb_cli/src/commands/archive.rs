//! Archive command implementation.

use super::{CliError, CliResult, Session};
use fdb_core::parse_request_str;
use std::fs;
use std::path::Path;
use tracing::info;

/// Runs the archive command.
pub fn run(
    session: &Session,
    file: &Path,
    key: Option<&str>,
    request: Option<&str>,
) -> CliResult<()> {
    let data = fs::read(file).map_err(|source| CliError::File {
        path: file.to_path_buf(),
        source,
    })?;
    let fdb = session.open()?;

    match (key, request) {
        (Some(key), _) => fdb.archive_key(&data, parse_key(key)?)?,
        (None, Some(request)) => fdb.archive_request(&data, request)?,
        (None, None) => fdb.archive(&data, None, None)?,
    }
    fdb.flush()?;

    info!(file = %file.display(), bytes = data.len(), "archived");
    Ok(())
}

/// Parses `name=value,...` where every field has exactly one value.
fn parse_key(text: &str) -> CliResult<Vec<(String, String)>> {
    parse_request_str(text)?
        .into_iter()
        .map(|(name, mut values)| match values.len() {
            1 => Ok((name, values.remove(0))),
            _ => Err(CliError::Usage {
                what: "key",
                message: format!("field '{name}' must have exactly one value"),
            }),
        })
        .collect()
}
