//! CLI command implementations.

pub mod archive;
pub mod list;
pub mod retrieve;
pub mod version;
pub mod wipe;

use fdb_core::{Fdb, FdbError, FdbOptions, LibraryRegistry, NativeApi};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the commands themselves.
#[derive(Debug, Error)]
pub enum CliError {
    /// The FDB bindings failed.
    #[error(transparent)]
    Fdb(#[from] FdbError),

    /// A file could not be read or written.
    #[error("{path}: {source}")]
    File {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A command-line value is malformed.
    #[error("invalid {what}: {message}")]
    Usage {
        /// Which argument.
        what: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for commands.
pub type CliResult<T> = Result<T, CliError>;

/// Global options selecting the library and configuration.
pub struct Session {
    /// Library path, searched for when `None`.
    pub library: Option<PathBuf>,
    /// Configuration file.
    pub config: Option<PathBuf>,
    /// FDB home directory.
    pub home: Option<PathBuf>,
}

impl Session {
    /// Loads the library.
    pub fn api(&self) -> CliResult<Arc<dyn NativeApi>> {
        Ok(LibraryRegistry::global().load(self.library.as_deref())?)
    }

    /// Opens a database session.
    pub fn open(&self) -> CliResult<Fdb> {
        let mut options = FdbOptions::new();
        if let Some(path) = &self.config {
            let text = fs::read_to_string(path).map_err(|source| CliError::File {
                path: path.clone(),
                source,
            })?;
            options = options.config(text);
        }
        if let Some(home) = &self.home {
            options = options.home(home);
        }
        Ok(Fdb::open(self.api()?, &options)?)
    }
}
