//! Opaque types and constants of the C API.

use std::ffi::c_int;

/// The call completed successfully.
pub const FDB_SUCCESS: c_int = 0;
/// A known exception was raised inside the library.
pub const FDB_ERROR_GENERAL_EXCEPTION: c_int = 1;
/// An unknown exception was raised inside the library.
pub const FDB_ERROR_UNKNOWN_EXCEPTION: c_int = 2;
/// An iterator has no further elements. Not an error.
pub const FDB_ITERATION_COMPLETE: c_int = 3;

macro_rules! opaque {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque! {
    /// A database session.
    fdb_handle_t;
    /// An exact archival key.
    fdb_key_t;
    /// A (possibly multi-valued) request.
    fdb_request_t;
    /// Iterator over listed fields.
    fdb_listiterator_t;
    /// Metadata of one listed field, split by schema level.
    fdb_split_key_t;
    /// Streaming reader over retrieved data.
    fdb_datareader_t;
    /// Iterator over wipe report lines.
    fdb_wipe_iterator_t;
    /// One wipe report line.
    fdb_wipe_element_t;
    /// Iterator over purge report lines.
    fdb_purge_iterator_t;
    /// One purge report line.
    fdb_purge_element_t;
}
