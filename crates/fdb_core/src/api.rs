//! The typed seam between the safe types and a native library.

use crate::error::FdbResult;
use crate::raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
use std::path::Path;

/// One typed wrapper per native entry point.
///
/// Implementations translate status codes into [`FdbError`](crate::FdbError)s
/// and return outputs instead of writing through pointers. Handles returned by
/// a `new_*` method must eventually be passed to the matching `delete_*`
/// method of the same implementation.
///
/// # Implementors
///
/// - [`NativeLibrary`](crate::NativeLibrary) - calls the library in this process
/// - [`WorkerProxy`](crate::WorkerProxy) - forwards calls to a worker subprocess
pub trait NativeApi: Send + Sync {
    /// Path (or label) of the library behind this API.
    fn library_path(&self) -> &Path;

    /// Version string reported by the library.
    fn version(&self) -> FdbResult<String>;

    /// Source control revision reported by the library.
    fn vcs_version(&self) -> FdbResult<String>;

    /// Opens a session using the library's default configuration discovery.
    fn new_handle(&self) -> FdbResult<RawHandle>;

    /// Opens a session from configuration text. Empty strings select defaults.
    fn new_handle_from_yaml(&self, config: &str, user_config: &str) -> FdbResult<RawHandle>;

    /// Releases a session.
    fn delete_handle(&self, fdb: RawHandle) -> FdbResult<()>;

    /// Archives one field under an explicit key.
    fn archive(&self, fdb: RawHandle, key: RawKey, data: &[u8]) -> FdbResult<()>;

    /// Archives self-describing data, checked against `request` when given.
    fn archive_multiple(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        data: &[u8],
    ) -> FdbResult<()>;

    /// Makes all archived data durable.
    fn flush(&self, fdb: RawHandle) -> FdbResult<()>;

    /// Creates an empty key.
    fn new_key(&self) -> FdbResult<RawKey>;

    /// Adds a field to a key.
    fn key_add(&self, key: RawKey, param: &str, value: &str) -> FdbResult<()>;

    /// Releases a key.
    fn delete_key(&self, key: RawKey) -> FdbResult<()>;

    /// Creates an empty request.
    fn new_request(&self) -> FdbResult<RawRequest>;

    /// Sets the values of one request field.
    fn request_add(&self, request: RawRequest, param: &str, values: &[String]) -> FdbResult<()>;

    /// Resolves defaults and aliases in a request.
    fn expand_request(&self, request: RawRequest) -> FdbResult<()>;

    /// Releases a request.
    fn delete_request(&self, request: RawRequest) -> FdbResult<()>;

    /// Starts listing fields matching `request` (everything when `None`).
    fn list(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        duplicates: bool,
    ) -> FdbResult<RawListIterator>;

    /// Advances a list iterator.
    fn listiterator_next(&self, iterator: RawListIterator) -> FdbResult<Step>;

    /// Location of the current element.
    fn listiterator_attrs(&self, iterator: RawListIterator) -> FdbResult<ListAttrs>;

    /// Fills `key` with the current element's metadata.
    fn listiterator_splitkey(&self, iterator: RawListIterator, key: RawSplitKey)
        -> FdbResult<()>;

    /// Releases a list iterator.
    fn delete_listiterator(&self, iterator: RawListIterator) -> FdbResult<()>;

    /// Creates an empty split key.
    fn new_splitkey(&self) -> FdbResult<RawSplitKey>;

    /// Next metadata field, or `None` once all fields have been yielded.
    fn splitkey_next_metadata(&self, key: RawSplitKey) -> FdbResult<Option<MetadataField>>;

    /// Releases a split key.
    fn delete_splitkey(&self, key: RawSplitKey) -> FdbResult<()>;

    /// Creates an unbound data reader.
    fn new_datareader(&self) -> FdbResult<RawDataReader>;

    /// Binds `reader` to the data matching `request`.
    fn retrieve(&self, fdb: RawHandle, request: RawRequest, reader: RawDataReader)
        -> FdbResult<()>;

    /// Opens a reader and returns its total size in bytes.
    fn datareader_open(&self, reader: RawDataReader) -> FdbResult<u64>;

    /// Closes a reader.
    fn datareader_close(&self, reader: RawDataReader) -> FdbResult<()>;

    /// Current position of a reader.
    fn datareader_tell(&self, reader: RawDataReader) -> FdbResult<u64>;

    /// Moves a reader to an absolute position.
    fn datareader_seek(&self, reader: RawDataReader, position: u64) -> FdbResult<()>;

    /// Moves a reader forward by `count` bytes.
    fn datareader_skip(&self, reader: RawDataReader, count: u64) -> FdbResult<()>;

    /// Reads up to `count` bytes. Fewer are returned at end of stream.
    fn datareader_read(&self, reader: RawDataReader, count: usize) -> FdbResult<Vec<u8>>;

    /// Releases a reader.
    fn delete_datareader(&self, reader: RawDataReader) -> FdbResult<()>;

    /// Starts a wipe of the databases matching `request`.
    fn wipe(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> FdbResult<RawWipeIterator>;

    /// Next wipe report line, or `None` when the wipe is complete.
    fn wipe_iterator_next(&self, iterator: RawWipeIterator) -> FdbResult<Option<String>>;

    /// Releases a wipe iterator.
    fn delete_wipe_iterator(&self, iterator: RawWipeIterator) -> FdbResult<()>;

    /// Starts a purge of superseded fields matching `request`.
    fn purge(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
    ) -> FdbResult<RawPurgeIterator>;

    /// Next purge report line, or `None` when the purge is complete.
    fn purge_iterator_next(&self, iterator: RawPurgeIterator) -> FdbResult<Option<String>>;

    /// Releases a purge iterator.
    fn delete_purge_iterator(&self, iterator: RawPurgeIterator) -> FdbResult<()>;
}

/// Returns true if both APIs are the same instance.
pub(crate) fn same_api(a: &dyn NativeApi, b: &dyn NativeApi) -> bool {
    std::ptr::eq(
        a as *const dyn NativeApi as *const (),
        b as *const dyn NativeApi as *const (),
    )
}

impl std::fmt::Debug for dyn NativeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeApi")
            .field("library", &self.library_path())
            .finish_non_exhaustive()
    }
}
