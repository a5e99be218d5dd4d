//! Wipe and purge command implementations.

use super::{CliResult, Session};
use fdb_core::{FdbResult, PurgeOptions, WipeOptions};
use std::io::{self, Write};
use tracing::warn;

fn print_report(report: impl Iterator<Item = FdbResult<String>>) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in report {
        writeln!(out, "{}", line?)?;
    }
    Ok(())
}

/// Runs the wipe command.
pub fn run(
    session: &Session,
    request: &str,
    doit: bool,
    porcelain: bool,
    unsafe_wipe_all: bool,
) -> CliResult<()> {
    if unsafe_wipe_all && !doit {
        warn!("--unsafe-wipe-all has no effect without --doit");
    }
    let fdb = session.open()?;
    let options = WipeOptions::default()
        .doit(doit)
        .porcelain(porcelain)
        .unsafe_wipe_all(unsafe_wipe_all);
    print_report(fdb.wipe(request, options)?)
}

/// Runs the purge command.
pub fn purge(session: &Session, request: &str, doit: bool, porcelain: bool) -> CliResult<()> {
    let fdb = session.open()?;
    let options = PurgeOptions::default().doit(doit).porcelain(porcelain);
    print_report(fdb.purge(request, options)?)
}
