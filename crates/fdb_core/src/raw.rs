//! Opaque native object handles as they cross the [`NativeApi`](crate::NativeApi) seam.
//!
//! Each native object kind gets its own `Copy` newtype so that a key can never
//! be passed where a request is expected. The value is the native address in
//! whichever process owns the library: this process for an in-process
//! library, the worker for a proxied one.

use serde::{Deserialize, Serialize};

macro_rules! raw_handles {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
            pub struct $name(u64);

            impl $name {
                /// Wraps a raw native address.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// Returns the raw native address.
                pub const fn into_raw(self) -> u64 {
                    self.0
                }

                pub(crate) fn from_ptr<T>(ptr: *mut T) -> Self {
                    Self(ptr as usize as u64)
                }

                pub(crate) fn as_ptr<T>(self) -> *mut T {
                    self.0 as usize as *mut T
                }
            }
        )*
    };
}

raw_handles! {
    /// A database session (`fdb_handle_t*`).
    RawHandle;
    /// A key (`fdb_key_t*`).
    RawKey;
    /// A request (`fdb_request_t*`).
    RawRequest;
    /// A list iterator (`fdb_listiterator_t*`).
    RawListIterator;
    /// A split key (`fdb_split_key_t*`).
    RawSplitKey;
    /// A data reader (`fdb_datareader_t*`).
    RawDataReader;
    /// A wipe iterator (`fdb_wipe_iterator_t*`).
    RawWipeIterator;
    /// A purge iterator (`fdb_purge_iterator_t*`).
    RawPurgeIterator;
}

/// Outcome of advancing a native iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    /// The iterator is positioned on a new element.
    Item,
    /// The iterator is exhausted.
    Complete,
}

/// Location of the element a list iterator is positioned on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAttrs {
    /// Storage path (or URI) of the data.
    pub path: String,
    /// Byte offset within the path.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
}

/// One metadata field yielded by a split key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    /// Field name.
    pub key: String,
    /// Field value.
    pub value: String,
    /// Schema level the field belongs to.
    pub level: usize,
}
