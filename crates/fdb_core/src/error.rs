//! Error types for the FDB bindings.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for FDB operations.
pub type FdbResult<T> = Result<T, FdbError>;

/// Errors that can occur while loading or calling the native library.
#[derive(Debug, Error)]
pub enum FdbError {
    /// No shared library could be found.
    #[error("FDB5 library not found (searched: {})", display_paths(.searched))]
    LibraryNotFound {
        /// Locations that were probed.
        searched: Vec<PathBuf>,
    },

    /// The shared library exists but could not be loaded.
    #[error("failed to load {path:?}: {source}")]
    LibraryLoad {
        /// Library path.
        path: PathBuf,
        /// Loader error, or its message when it was raised in a worker.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A required entry point is missing from the library.
    #[error(transparent)]
    MissingSymbol(#[from] fdb_sys::SymbolError),

    /// The loaded library is older than the minimum supported version.
    #[error("these bindings require fdb version {required} or greater, but fdb version {found} was loaded from {path:?}")]
    IncompatibleVersion {
        /// Version reported by the library.
        found: String,
        /// Minimum version required.
        required: &'static str,
        /// Library path.
        path: PathBuf,
    },

    /// A native call returned a failure status.
    #[error("Error in function {function}: {message}")]
    NativeCall {
        /// Native function name.
        function: String,
        /// Status code returned.
        code: i32,
        /// Message reported by the library.
        message: String,
    },

    /// A home directory and inline configuration were both supplied.
    #[error("a home directory and an inline configuration cannot both be specified")]
    ConfigurationConflict,

    /// Mutually exclusive arguments were supplied together.
    #[error("conflicting arguments: {message}")]
    ConflictingArguments {
        /// Which arguments conflict.
        message: String,
    },

    /// Only absolute seeks are supported by data readers.
    #[error("only absolute (from start) seeks are supported on data readers")]
    UnsupportedSeekMode,

    /// An argument could not be passed to the library.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Configuration could not be prepared.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The worker subprocess failed or went away.
    #[error("worker error: {message}")]
    Worker {
        /// Description of the failure.
        message: String,
    },

    /// A malformed message was exchanged with the worker.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the problem.
        message: String,
    },
}

impl FdbError {
    /// Creates a native call error.
    pub fn native_call(function: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::NativeCall {
            function: function.into(),
            code,
            message: message.into(),
        }
    }

    /// Creates a conflicting arguments error.
    pub fn conflicting_arguments(message: impl Into<String>) -> Self {
        Self::ConflictingArguments {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns true if this error was reported by the native library.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::NativeCall { .. })
    }
}

impl From<FdbError> for io::Error {
    fn from(err: FdbError) -> Self {
        match err {
            FdbError::Io(e) => e,
            FdbError::UnsupportedSeekMode => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "system search path".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
