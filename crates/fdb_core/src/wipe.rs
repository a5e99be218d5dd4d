//! Wipe and purge reports.

use crate::api::NativeApi;
use crate::error::FdbResult;
use crate::raw::{RawPurgeIterator, RawWipeIterator};
use std::iter::FusedIterator;
use std::sync::Arc;
use tracing::warn;

/// Options for [`Fdb::wipe`](crate::Fdb::wipe).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WipeOptions {
    /// Delete data. Without it the wipe only reports what would go.
    pub doit: bool,
    /// Report bare paths instead of human-readable text.
    pub porcelain: bool,
    /// Also delete unrecognised files found alongside the data.
    pub unsafe_wipe_all: bool,
}

impl WipeOptions {
    /// Sets [`doit`](Self::doit).
    #[must_use]
    pub fn doit(mut self, doit: bool) -> Self {
        self.doit = doit;
        self
    }

    /// Sets [`porcelain`](Self::porcelain).
    #[must_use]
    pub fn porcelain(mut self, porcelain: bool) -> Self {
        self.porcelain = porcelain;
        self
    }

    /// Sets [`unsafe_wipe_all`](Self::unsafe_wipe_all).
    #[must_use]
    pub fn unsafe_wipe_all(mut self, unsafe_wipe_all: bool) -> Self {
        self.unsafe_wipe_all = unsafe_wipe_all;
        self
    }
}

/// Options for [`Fdb::purge`](crate::Fdb::purge).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Delete superseded data. Without it the purge only reports.
    pub doit: bool,
    /// Report bare paths instead of human-readable text.
    pub porcelain: bool,
}

impl PurgeOptions {
    /// Sets [`doit`](Self::doit).
    #[must_use]
    pub fn doit(mut self, doit: bool) -> Self {
        self.doit = doit;
        self
    }

    /// Sets [`porcelain`](Self::porcelain).
    #[must_use]
    pub fn porcelain(mut self, porcelain: bool) -> Self {
        self.porcelain = porcelain;
        self
    }
}

macro_rules! report_iterator {
    ($(#[$doc:meta])* $name:ident, $raw:ty, $next:ident, $delete:ident, $what:literal) => {
        $(#[$doc])*
        pub struct $name {
            api: Arc<dyn NativeApi>,
            raw: $raw,
            exhausted: bool,
        }

        impl $name {
            pub(crate) fn new(api: Arc<dyn NativeApi>, raw: $raw) -> Self {
                Self {
                    api,
                    raw,
                    exhausted: false,
                }
            }
        }

        impl Iterator for $name {
            type Item = FdbResult<String>;

            fn next(&mut self) -> Option<Self::Item> {
                if self.exhausted {
                    return None;
                }
                match self.api.$next(self.raw) {
                    Ok(Some(line)) => Some(Ok(line)),
                    Ok(None) => {
                        self.exhausted = true;
                        None
                    }
                    Err(e) => {
                        self.exhausted = true;
                        Some(Err(e))
                    }
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("raw", &self.raw)
                    .field("exhausted", &self.exhausted)
                    .finish_non_exhaustive()
            }
        }

        impl FusedIterator for $name {}

        impl Drop for $name {
            fn drop(&mut self) {
                if let Err(e) = self.api.$delete(self.raw) {
                    warn!(error = %e, "failed to release FDB {} iterator", $what);
                }
            }
        }
    };
}

report_iterator!(
    /// Report lines of a wipe, one per step.
    ///
    /// Some libraries perform the wipe while the report is being pulled, so
    /// drain the iterator to be sure it has finished.
    WipeIterator,
    RawWipeIterator,
    wipe_iterator_next,
    delete_wipe_iterator,
    "wipe"
);

report_iterator!(
    /// Report lines of a purge, one per step.
    PurgeIterator,
    RawPurgeIterator,
    purge_iterator_next,
    delete_purge_iterator,
    "purge"
);
