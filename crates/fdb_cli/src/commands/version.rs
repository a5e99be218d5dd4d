//! Version command implementation.

use super::{CliResult, Session};

/// Runs the version command.
pub fn run(session: &Session) -> CliResult<()> {
    println!("FDB CLI v{}", env!("CARGO_PKG_VERSION"));
    let api = session.api()?;
    println!(
        "FDB library v{} ({}) from {}",
        api.version()?,
        api.vcs_version()?,
        api.library_path().display()
    );
    Ok(())
}
