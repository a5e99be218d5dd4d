//! Locating, loading and calling the native library in this process.

use crate::api::NativeApi;
use crate::error::{FdbError, FdbResult};
use crate::raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
use crate::version::{is_compatible, MIN_FDB_VERSION};
use fdb_sys::{Symbols, FDB_ITERATION_COMPLETE, FDB_SUCCESS};
use libloading::Library;
use std::env;
use std::ffi::{c_char, c_int, c_long, c_void, CStr, CString, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variables naming an FDB installation prefix, in search order.
pub const PREFIX_VARIABLES: &[&str] = &["FDB5_HOME", "FDB5_DIR", "FDB_HOME"];

const SYSTEM_LIBRARY_DIRS: &[&str] = &[
    "/usr/local/lib",
    "/usr/local/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/opt/homebrew/lib",
];

/// Calls a bound symbol and translates its status code.
macro_rules! call {
    ($lib:expr, $name:ident($($arg:expr),* $(,)?)) => {{
        // SAFETY: the symbol table was resolved for the declared C signatures
        // and every pointer argument is valid for the duration of the call.
        let code = unsafe { ($lib.symbols.$name)($($arg),*) };
        $lib.check(stringify!($name), code)
    }};
}

/// Candidate library files, in search order, for the given environment.
pub fn search_paths_with<F>(var: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<OsString>,
{
    let file = fdb_sys::library_filename();
    let mut dirs = Vec::new();

    for name in PREFIX_VARIABLES {
        if let Some(prefix) = var(name) {
            let prefix = PathBuf::from(prefix);
            dirs.push(prefix.join("lib"));
            dirs.push(prefix.join("lib64"));
        }
    }
    for name in ["LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH"] {
        if let Some(value) = var(name) {
            dirs.extend(env::split_paths(&value));
        }
    }
    dirs.extend(SYSTEM_LIBRARY_DIRS.iter().map(PathBuf::from));

    dirs.into_iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(&file))
        .collect()
}

/// Candidate library files for the current process environment.
pub fn search_paths() -> Vec<PathBuf> {
    search_paths_with(|name| env::var_os(name))
}

/// Finds the shared library on disk.
///
/// An explicit `hint` may name the library file itself or the directory
/// containing it; it is not combined with the automatic search.
pub fn locate(hint: Option<&Path>) -> FdbResult<PathBuf> {
    if let Some(hint) = hint {
        let path = if hint.is_dir() {
            hint.join(fdb_sys::library_filename())
        } else {
            hint.to_path_buf()
        };
        if path.is_file() {
            return Ok(path);
        }
        return Err(FdbError::LibraryNotFound {
            searched: vec![path],
        });
    }

    let searched = search_paths();
    match searched.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(FdbError::LibraryNotFound { searched }),
    }
}

/// The native library loaded into this process, with its bound symbols.
pub struct NativeLibrary {
    symbols: Symbols,
    path: PathBuf,
    version: String,
    // Kept last so that it outlives everything resolved from it.
    _library: Option<Library>,
}

impl NativeLibrary {
    /// Locates, loads and initialises the library.
    ///
    /// Falls back to the system loader's own search when nothing is found on
    /// disk and no hint was given.
    pub fn load(hint: Option<&Path>) -> FdbResult<Self> {
        let (path, library) = match locate(hint) {
            Ok(path) => {
                // SAFETY: loading runs the library's initialisers; libfdb5 has
                // no initialisers with preconditions on the host process.
                let library = unsafe { Library::new(&path) }.map_err(|source| {
                    FdbError::LibraryLoad {
                        path: path.clone(),
                        source: source.into(),
                    }
                })?;
                (path, library)
            }
            Err(FdbError::LibraryNotFound { searched }) if hint.is_none() => {
                let name = PathBuf::from(fdb_sys::library_filename());
                // SAFETY: as above.
                match unsafe { Library::new(&name) } {
                    Ok(library) => (name, library),
                    Err(_) => return Err(FdbError::LibraryNotFound { searched }),
                }
            }
            Err(e) => return Err(e),
        };

        // SAFETY: libfdb5 exports these symbols with the declared signatures,
        // and `library` is stored alongside the table.
        let symbols = unsafe { Symbols::load(&library) }?;
        debug!(path = %path.display(), "loaded FDB library");
        Self::initialise(symbols, path, Some(library))
    }

    /// Initialises an already-resolved symbol table.
    ///
    /// Used for statically linked implementations of the C API. `label` is
    /// reported as the library path.
    pub fn from_symbols(symbols: Symbols, label: impl Into<PathBuf>) -> FdbResult<Self> {
        Self::initialise(symbols, label.into(), None)
    }

    fn initialise(symbols: Symbols, path: PathBuf, library: Option<Library>) -> FdbResult<Self> {
        let mut lib = Self {
            symbols,
            path,
            version: String::new(),
            _library: library,
        };

        call!(lib, fdb_initialise())?;

        let mut version: *const c_char = std::ptr::null();
        call!(lib, fdb_version(&mut version))?;
        // SAFETY: the library returns a static NUL-terminated string.
        lib.version = unsafe { owned_string(version) };

        if !is_compatible(&lib.version) {
            return Err(FdbError::IncompatibleVersion {
                found: lib.version,
                required: MIN_FDB_VERSION,
                path: lib.path,
            });
        }

        debug!(version = %lib.version, "initialised FDB library");
        Ok(lib)
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version reported at load time.
    pub fn version_str(&self) -> &str {
        &self.version
    }

    fn check(&self, function: &'static str, code: c_int) -> FdbResult<c_int> {
        if code == FDB_SUCCESS || code == FDB_ITERATION_COMPLETE {
            return Ok(code);
        }
        // SAFETY: the error string is owned by the library and NUL-terminated.
        let message = unsafe { owned_string((self.symbols.fdb_error_string)(code)) };
        Err(FdbError::native_call(function, code, message))
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<FDB5 version {} from {}>",
            self.version,
            self.path.display()
        )
    }
}

/// Copies a C string owned by the library. Null yields an empty string.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn owned_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn c_string(value: &str) -> FdbResult<CString> {
    CString::new(value)
        .map_err(|_| FdbError::invalid_argument(format!("{value:?} contains a NUL byte")))
}

fn c_long_from(value: u64) -> FdbResult<c_long> {
    c_long::try_from(value)
        .map_err(|_| FdbError::invalid_argument(format!("{value} is out of range")))
}

impl NativeApi for NativeLibrary {
    fn library_path(&self) -> &Path {
        &self.path
    }

    fn version(&self) -> FdbResult<String> {
        Ok(self.version.clone())
    }

    fn vcs_version(&self) -> FdbResult<String> {
        let mut sha: *const c_char = std::ptr::null();
        call!(self, fdb_vcs_version(&mut sha))?;
        // SAFETY: static NUL-terminated string.
        Ok(unsafe { owned_string(sha) })
    }

    fn new_handle(&self) -> FdbResult<RawHandle> {
        let mut fdb = std::ptr::null_mut();
        call!(self, fdb_new_handle(&mut fdb))?;
        Ok(RawHandle::from_ptr(fdb))
    }

    fn new_handle_from_yaml(&self, config: &str, user_config: &str) -> FdbResult<RawHandle> {
        let config = c_string(config)?;
        let user_config = c_string(user_config)?;
        let mut fdb = std::ptr::null_mut();
        call!(
            self,
            fdb_new_handle_from_yaml(&mut fdb, config.as_ptr(), user_config.as_ptr())
        )?;
        Ok(RawHandle::from_ptr(fdb))
    }

    fn delete_handle(&self, fdb: RawHandle) -> FdbResult<()> {
        call!(self, fdb_delete_handle(fdb.as_ptr())).map(drop)
    }

    fn archive(&self, fdb: RawHandle, key: RawKey, data: &[u8]) -> FdbResult<()> {
        call!(
            self,
            fdb_archive(
                fdb.as_ptr(),
                key.as_ptr(),
                data.as_ptr() as *const c_char,
                data.len()
            )
        )
        .map(drop)
    }

    fn archive_multiple(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        data: &[u8],
    ) -> FdbResult<()> {
        let request = request.map_or(std::ptr::null_mut(), |r| r.as_ptr());
        call!(
            self,
            fdb_archive_multiple(
                fdb.as_ptr(),
                request,
                data.as_ptr() as *const c_char,
                data.len()
            )
        )
        .map(drop)
    }

    fn flush(&self, fdb: RawHandle) -> FdbResult<()> {
        call!(self, fdb_flush(fdb.as_ptr())).map(drop)
    }

    fn new_key(&self) -> FdbResult<RawKey> {
        let mut key = std::ptr::null_mut();
        call!(self, fdb_new_key(&mut key))?;
        Ok(RawKey::from_ptr(key))
    }

    fn key_add(&self, key: RawKey, param: &str, value: &str) -> FdbResult<()> {
        let param = c_string(param)?;
        let value = c_string(value)?;
        call!(self, fdb_key_add(key.as_ptr(), param.as_ptr(), value.as_ptr())).map(drop)
    }

    fn delete_key(&self, key: RawKey) -> FdbResult<()> {
        call!(self, fdb_delete_key(key.as_ptr())).map(drop)
    }

    fn new_request(&self) -> FdbResult<RawRequest> {
        let mut request = std::ptr::null_mut();
        call!(self, fdb_new_request(&mut request))?;
        Ok(RawRequest::from_ptr(request))
    }

    fn request_add(&self, request: RawRequest, param: &str, values: &[String]) -> FdbResult<()> {
        let param = c_string(param)?;
        let values = values
            .iter()
            .map(|v| c_string(v))
            .collect::<FdbResult<Vec<_>>>()?;
        let pointers: Vec<*const c_char> = values.iter().map(|v| v.as_ptr()).collect();
        let count = c_int::try_from(pointers.len())
            .map_err(|_| FdbError::invalid_argument("too many request values"))?;
        call!(
            self,
            fdb_request_add(request.as_ptr(), param.as_ptr(), pointers.as_ptr(), count)
        )
        .map(drop)
    }

    fn expand_request(&self, request: RawRequest) -> FdbResult<()> {
        call!(self, fdb_expand_request(request.as_ptr())).map(drop)
    }

    fn delete_request(&self, request: RawRequest) -> FdbResult<()> {
        call!(self, fdb_delete_request(request.as_ptr())).map(drop)
    }

    fn list(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        duplicates: bool,
    ) -> FdbResult<RawListIterator> {
        let request = request.map_or(std::ptr::null(), |r| {
            r.as_ptr::<fdb_sys::fdb_request_t>().cast_const()
        });
        let mut iterator = std::ptr::null_mut();
        call!(self, fdb_list(fdb.as_ptr(), request, &mut iterator, duplicates))?;
        Ok(RawListIterator::from_ptr(iterator))
    }

    fn listiterator_next(&self, iterator: RawListIterator) -> FdbResult<Step> {
        let code = call!(self, fdb_listiterator_next(iterator.as_ptr()))?;
        Ok(if code == FDB_ITERATION_COMPLETE {
            Step::Complete
        } else {
            Step::Item
        })
    }

    fn listiterator_attrs(&self, iterator: RawListIterator) -> FdbResult<ListAttrs> {
        let mut path: *const c_char = std::ptr::null();
        let mut offset = 0usize;
        let mut length = 0usize;
        call!(
            self,
            fdb_listiterator_attrs(iterator.as_ptr(), &mut path, &mut offset, &mut length)
        )?;
        Ok(ListAttrs {
            // SAFETY: valid until the iterator advances; copied immediately.
            path: unsafe { owned_string(path) },
            offset: offset as u64,
            length: length as u64,
        })
    }

    fn listiterator_splitkey(
        &self,
        iterator: RawListIterator,
        key: RawSplitKey,
    ) -> FdbResult<()> {
        call!(self, fdb_listiterator_splitkey(iterator.as_ptr(), key.as_ptr())).map(drop)
    }

    fn delete_listiterator(&self, iterator: RawListIterator) -> FdbResult<()> {
        call!(self, fdb_delete_listiterator(iterator.as_ptr())).map(drop)
    }

    fn new_splitkey(&self) -> FdbResult<RawSplitKey> {
        let mut key = std::ptr::null_mut();
        call!(self, fdb_new_splitkey(&mut key))?;
        Ok(RawSplitKey::from_ptr(key))
    }

    fn splitkey_next_metadata(&self, key: RawSplitKey) -> FdbResult<Option<MetadataField>> {
        let mut name: *const c_char = std::ptr::null();
        let mut value: *const c_char = std::ptr::null();
        let mut level = 0usize;
        let code = call!(
            self,
            fdb_splitkey_next_metadata(key.as_ptr(), &mut name, &mut value, &mut level)
        )?;
        if code == FDB_ITERATION_COMPLETE {
            return Ok(None);
        }
        // SAFETY: valid until the split key advances; copied immediately.
        let (key, value) = unsafe { (owned_string(name), owned_string(value)) };
        Ok(Some(MetadataField { key, value, level }))
    }

    fn delete_splitkey(&self, key: RawSplitKey) -> FdbResult<()> {
        call!(self, fdb_delete_splitkey(key.as_ptr())).map(drop)
    }

    fn new_datareader(&self) -> FdbResult<RawDataReader> {
        let mut reader = std::ptr::null_mut();
        call!(self, fdb_new_datareader(&mut reader))?;
        Ok(RawDataReader::from_ptr(reader))
    }

    fn retrieve(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        reader: RawDataReader,
    ) -> FdbResult<()> {
        call!(
            self,
            fdb_retrieve(fdb.as_ptr(), request.as_ptr(), reader.as_ptr())
        )
        .map(drop)
    }

    fn datareader_open(&self, reader: RawDataReader) -> FdbResult<u64> {
        let mut size: c_long = 0;
        call!(self, fdb_datareader_open(reader.as_ptr(), &mut size))?;
        Ok(size.max(0) as u64)
    }

    fn datareader_close(&self, reader: RawDataReader) -> FdbResult<()> {
        call!(self, fdb_datareader_close(reader.as_ptr())).map(drop)
    }

    fn datareader_tell(&self, reader: RawDataReader) -> FdbResult<u64> {
        let mut position: c_long = 0;
        call!(self, fdb_datareader_tell(reader.as_ptr(), &mut position))?;
        Ok(position.max(0) as u64)
    }

    fn datareader_seek(&self, reader: RawDataReader, position: u64) -> FdbResult<()> {
        let position = c_long_from(position)?;
        call!(self, fdb_datareader_seek(reader.as_ptr(), position)).map(drop)
    }

    fn datareader_skip(&self, reader: RawDataReader, count: u64) -> FdbResult<()> {
        let count = c_long_from(count)?;
        call!(self, fdb_datareader_skip(reader.as_ptr(), count)).map(drop)
    }

    fn datareader_read(&self, reader: RawDataReader, count: usize) -> FdbResult<Vec<u8>> {
        let mut buffer = vec![0u8; count];
        let mut read: c_long = 0;
        call!(
            self,
            fdb_datareader_read(
                reader.as_ptr(),
                buffer.as_mut_ptr() as *mut c_void,
                c_long_from(count as u64)?,
                &mut read
            )
        )?;
        buffer.truncate((read.max(0) as usize).min(count));
        Ok(buffer)
    }

    fn delete_datareader(&self, reader: RawDataReader) -> FdbResult<()> {
        call!(self, fdb_delete_datareader(reader.as_ptr())).map(drop)
    }

    fn wipe(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> FdbResult<RawWipeIterator> {
        let mut iterator = std::ptr::null_mut();
        call!(
            self,
            fdb_wipe(
                fdb.as_ptr(),
                request.as_ptr(),
                doit,
                porcelain,
                unsafe_wipe_all,
                &mut iterator
            )
        )?;
        Ok(RawWipeIterator::from_ptr(iterator))
    }

    fn wipe_iterator_next(&self, iterator: RawWipeIterator) -> FdbResult<Option<String>> {
        let mut element = std::ptr::null_mut();
        let code = call!(self, fdb_wipe_iterator_next(iterator.as_ptr(), &mut element))?;
        if code == FDB_ITERATION_COMPLETE {
            return Ok(None);
        }
        let mut text: *const c_char = std::ptr::null();
        // SAFETY: the text belongs to the element and is copied before release.
        let line = call!(self, fdb_wipe_element_string(element, &mut text))
            .map(|_| unsafe { owned_string(text) });
        let released = call!(self, fdb_delete_wipe_element(element));
        let line = line?;
        released?;
        Ok(Some(line))
    }

    fn delete_wipe_iterator(&self, iterator: RawWipeIterator) -> FdbResult<()> {
        call!(self, fdb_delete_wipe_iterator(iterator.as_ptr())).map(drop)
    }

    fn purge(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
    ) -> FdbResult<RawPurgeIterator> {
        let mut iterator = std::ptr::null_mut();
        call!(
            self,
            fdb_purge(fdb.as_ptr(), request.as_ptr(), doit, porcelain, &mut iterator)
        )?;
        Ok(RawPurgeIterator::from_ptr(iterator))
    }

    fn purge_iterator_next(&self, iterator: RawPurgeIterator) -> FdbResult<Option<String>> {
        let mut element = std::ptr::null_mut();
        let code = call!(self, fdb_purge_iterator_next(iterator.as_ptr(), &mut element))?;
        if code == FDB_ITERATION_COMPLETE {
            return Ok(None);
        }
        let mut text: *const c_char = std::ptr::null();
        // SAFETY: the text belongs to the element and is copied before release.
        let line = call!(self, fdb_purge_element_string(element, &mut text))
            .map(|_| unsafe { owned_string(text) });
        let released = call!(self, fdb_delete_purge_element(element));
        let line = line?;
        released?;
        Ok(Some(line))
    }

    fn delete_purge_iterator(&self, iterator: RawPurgeIterator) -> FdbResult<()> {
        call!(self, fdb_delete_purge_iterator(iterator.as_ptr())).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn prefixes_searched_before_system_dirs() {
        let paths = search_paths_with(env_of(&[
            ("FDB5_DIR", "/opt/fdb"),
            ("LD_LIBRARY_PATH", "/custom/lib"),
        ]));
        let file = fdb_sys::library_filename();
        assert_eq!(paths[0], Path::new("/opt/fdb/lib").join(&file));
        assert_eq!(paths[1], Path::new("/opt/fdb/lib64").join(&file));
        assert_eq!(paths[2], Path::new("/custom/lib").join(&file));
        assert!(paths.contains(&Path::new("/usr/lib").join(&file)));
    }

    #[test]
    fn home_prefix_precedes_dir_prefix() {
        let paths = search_paths_with(env_of(&[("FDB5_DIR", "/b"), ("FDB5_HOME", "/a")]));
        assert!(paths[0].starts_with("/a"));
        assert!(paths[2].starts_with("/b"));
    }

    #[test]
    fn missing_hint_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let hint = dir.path().join("libnothing.so");
        let err = locate(Some(&hint)).unwrap_err();
        assert!(matches!(err, FdbError::LibraryNotFound { ref searched } if searched == &vec![hint.clone()]));
    }

    #[test]
    fn directory_hint_resolves_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(fdb_sys::library_filename());
        std::fs::write(&file, b"").unwrap();
        assert_eq!(locate(Some(dir.path())).unwrap(), file);
    }

    #[test]
    fn explicit_hint_that_is_not_a_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("libfdb5-broken.so");
        std::fs::write(&file, b"not a shared object").unwrap();
        let err = NativeLibrary::load(Some(&file)).unwrap_err();
        assert!(matches!(err, FdbError::LibraryLoad { .. }));
    }

    #[test]
    fn c_string_rejects_nul() {
        assert!(c_string("a\0b").is_err());
        assert_eq!(c_string("abc").unwrap().as_bytes(), b"abc");
    }
}
