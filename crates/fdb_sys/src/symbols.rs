//! The enumerated symbol table.

use crate::types::*;
use libloading::Library;
use std::ffi::{c_char, c_int, c_long, c_void};
use thiserror::Error;

/// A symbol could not be resolved from the loaded library.
#[derive(Debug, Error)]
#[error("symbol `{symbol}` not found: {source}")]
pub struct SymbolError {
    /// Name of the missing symbol.
    pub symbol: String,
    /// Loader error.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

macro_rules! symbols {
    ($($(#[$doc:meta])* fn $name:ident($($arg:ty),*) -> $ret:ty;)*) => {
        /// Function pointers for every entry point consumed from `libfdb5`.
        ///
        /// A table can be resolved from a dynamically loaded library with
        /// [`Symbols::load`], or filled in directly from statically linked
        /// functions with the same signatures.
        #[derive(Clone, Copy)]
        pub struct Symbols {
            $(
                $(#[$doc])*
                pub $name: unsafe extern "C" fn($($arg),*) -> $ret,
            )*
        }

        impl Symbols {
            /// Names of all symbols in the table, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$(stringify!($name)),*];

            /// Resolves every symbol from `library`.
            ///
            /// # Safety
            ///
            /// The library must export these symbols with exactly the
            /// declared C signatures, and must outlive the returned table.
            pub unsafe fn load(library: &Library) -> Result<Self, SymbolError> {
                Ok(Self {
                    $(
                        $name: *library
                            .get::<unsafe extern "C" fn($($arg),*) -> $ret>(
                                concat!(stringify!($name), "\0").as_bytes(),
                            )
                            .map_err(|source| SymbolError {
                                symbol: stringify!($name).to_string(),
                                source: source.into(),
                            })?,
                    )*
                })
            }
        }
    };
}

symbols! {
    /// One-time global initialisation.
    fn fdb_initialise() -> c_int;
    /// Library version string.
    fn fdb_version(*mut *const c_char) -> c_int;
    /// Source control revision the library was built from.
    fn fdb_vcs_version(*mut *const c_char) -> c_int;
    /// Human-readable message for a status code.
    fn fdb_error_string(c_int) -> *const c_char;

    /// Opens a session using default configuration discovery.
    fn fdb_new_handle(*mut *mut fdb_handle_t) -> c_int;
    /// Opens a session from system and user configuration text.
    fn fdb_new_handle_from_yaml(*mut *mut fdb_handle_t, *const c_char, *const c_char) -> c_int;
    /// Releases a session.
    fn fdb_delete_handle(*mut fdb_handle_t) -> c_int;
    /// Archives one field under an explicit key.
    fn fdb_archive(*mut fdb_handle_t, *mut fdb_key_t, *const c_char, usize) -> c_int;
    /// Archives self-describing data, optionally checked against a request.
    fn fdb_archive_multiple(*mut fdb_handle_t, *mut fdb_request_t, *const c_char, usize) -> c_int;
    /// Makes archived data durable.
    fn fdb_flush(*mut fdb_handle_t) -> c_int;
    /// Lists fields matching a request (null for everything).
    fn fdb_list(*mut fdb_handle_t, *const fdb_request_t, *mut *mut fdb_listiterator_t, bool) -> c_int;
    /// Binds a data reader to the fields matching a request.
    fn fdb_retrieve(*mut fdb_handle_t, *mut fdb_request_t, *mut fdb_datareader_t) -> c_int;
    /// Wipes databases matching a request.
    fn fdb_wipe(*mut fdb_handle_t, *mut fdb_request_t, bool, bool, bool, *mut *mut fdb_wipe_iterator_t) -> c_int;
    /// Purges superseded fields matching a request.
    fn fdb_purge(*mut fdb_handle_t, *mut fdb_request_t, bool, bool, *mut *mut fdb_purge_iterator_t) -> c_int;

    /// Creates an empty key.
    fn fdb_new_key(*mut *mut fdb_key_t) -> c_int;
    /// Adds one field to a key.
    fn fdb_key_add(*mut fdb_key_t, *const c_char, *const c_char) -> c_int;
    /// Releases a key.
    fn fdb_delete_key(*mut fdb_key_t) -> c_int;

    /// Creates an empty request.
    fn fdb_new_request(*mut *mut fdb_request_t) -> c_int;
    /// Sets the values of one request field.
    fn fdb_request_add(*mut fdb_request_t, *const c_char, *const *const c_char, c_int) -> c_int;
    /// Resolves defaults and aliases in a request.
    fn fdb_expand_request(*mut fdb_request_t) -> c_int;
    /// Releases a request.
    fn fdb_delete_request(*mut fdb_request_t) -> c_int;

    /// Advances a list iterator.
    fn fdb_listiterator_next(*mut fdb_listiterator_t) -> c_int;
    /// Location of the current element.
    fn fdb_listiterator_attrs(*mut fdb_listiterator_t, *mut *const c_char, *mut usize, *mut usize) -> c_int;
    /// Fills a split key with the current element's metadata.
    fn fdb_listiterator_splitkey(*mut fdb_listiterator_t, *mut fdb_split_key_t) -> c_int;
    /// Releases a list iterator.
    fn fdb_delete_listiterator(*mut fdb_listiterator_t) -> c_int;

    /// Creates an empty split key.
    fn fdb_new_splitkey(*mut *mut fdb_split_key_t) -> c_int;
    /// Yields the next metadata field and its schema level.
    fn fdb_splitkey_next_metadata(*mut fdb_split_key_t, *mut *const c_char, *mut *const c_char, *mut usize) -> c_int;
    /// Releases a split key.
    fn fdb_delete_splitkey(*mut fdb_split_key_t) -> c_int;

    /// Creates an unbound data reader.
    fn fdb_new_datareader(*mut *mut fdb_datareader_t) -> c_int;
    /// Opens a bound reader, reporting its total size.
    fn fdb_datareader_open(*mut fdb_datareader_t, *mut c_long) -> c_int;
    /// Closes a reader.
    fn fdb_datareader_close(*mut fdb_datareader_t) -> c_int;
    /// Current position.
    fn fdb_datareader_tell(*mut fdb_datareader_t, *mut c_long) -> c_int;
    /// Absolute reposition.
    fn fdb_datareader_seek(*mut fdb_datareader_t, c_long) -> c_int;
    /// Relative forward skip.
    fn fdb_datareader_skip(*mut fdb_datareader_t, c_long) -> c_int;
    /// Reads up to `count` bytes.
    fn fdb_datareader_read(*mut fdb_datareader_t, *mut c_void, c_long, *mut c_long) -> c_int;
    /// Releases a reader.
    fn fdb_delete_datareader(*mut fdb_datareader_t) -> c_int;

    /// Advances a wipe iterator.
    fn fdb_wipe_iterator_next(*mut fdb_wipe_iterator_t, *mut *mut fdb_wipe_element_t) -> c_int;
    /// Text of a wipe element.
    fn fdb_wipe_element_string(*mut fdb_wipe_element_t, *mut *const c_char) -> c_int;
    /// Releases a wipe element.
    fn fdb_delete_wipe_element(*mut fdb_wipe_element_t) -> c_int;
    /// Releases a wipe iterator.
    fn fdb_delete_wipe_iterator(*mut fdb_wipe_iterator_t) -> c_int;

    /// Advances a purge iterator.
    fn fdb_purge_iterator_next(*mut fdb_purge_iterator_t, *mut *mut fdb_purge_element_t) -> c_int;
    /// Text of a purge element.
    fn fdb_purge_element_string(*mut fdb_purge_element_t, *mut *const c_char) -> c_int;
    /// Releases a purge element.
    fn fdb_delete_purge_element(*mut fdb_purge_element_t) -> c_int;
    /// Releases a purge iterator.
    fn fdb_delete_purge_iterator(*mut fdb_purge_iterator_t) -> c_int;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names = Symbols::NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Symbols::NAMES.len());
    }

    #[test]
    fn names_use_library_prefix() {
        assert!(Symbols::NAMES.iter().all(|n| n.starts_with("fdb_")));
        assert!(Symbols::NAMES.contains(&"fdb_listiterator_next"));
    }
}
