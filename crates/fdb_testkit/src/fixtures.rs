//! Test fixtures and session helpers.
//!
//! Provides the mock library as a ready [`NativeApi`], sessions over
//! temporary roots, and the canonical four-field population used by the
//! archive, list and wipe scenarios.

use crate::abi;
use crate::store::encode_message;
use fdb_core::{Fdb, FdbConfig, FdbOptions, FdbResult, ListOptions, NativeApi, NativeLibrary};
use fdb_sys::Symbols;
use std::ffi::{c_char, c_int};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Library path reported by the mock library.
pub const MOCK_LIBRARY_LABEL: &str = "mock/libfdb5";

/// Payload archived by [`populate`].
pub const FIELD_DATA: &[u8] = b"-1 Kelvin";

/// The request every populated field starts from.
pub const BASE_REQUEST: &[(&str, &str)] = &[
    ("class", "rd"),
    ("expver", "xxxx"),
    ("stream", "oper"),
    ("type", "fc"),
    ("date", "20000101"),
    ("time", "0000"),
    ("domain", "g"),
    ("levtype", "pl"),
    ("levelist", "300"),
    ("param", "138"),
    ("step", "0"),
];

macro_rules! symbol_table {
    ($($name:ident),* $(,)?) => {
        Symbols { $($name: abi::$name),* }
    };
}

/// The mock library's symbol table.
pub fn mock_symbols() -> Symbols {
    symbol_table!(
        fdb_initialise,
        fdb_version,
        fdb_vcs_version,
        fdb_error_string,
        fdb_new_handle,
        fdb_new_handle_from_yaml,
        fdb_delete_handle,
        fdb_archive,
        fdb_archive_multiple,
        fdb_flush,
        fdb_list,
        fdb_retrieve,
        fdb_wipe,
        fdb_purge,
        fdb_new_key,
        fdb_key_add,
        fdb_delete_key,
        fdb_new_request,
        fdb_request_add,
        fdb_expand_request,
        fdb_delete_request,
        fdb_listiterator_next,
        fdb_listiterator_attrs,
        fdb_listiterator_splitkey,
        fdb_delete_listiterator,
        fdb_new_splitkey,
        fdb_splitkey_next_metadata,
        fdb_delete_splitkey,
        fdb_new_datareader,
        fdb_datareader_open,
        fdb_datareader_close,
        fdb_datareader_tell,
        fdb_datareader_seek,
        fdb_datareader_skip,
        fdb_datareader_read,
        fdb_delete_datareader,
        fdb_wipe_iterator_next,
        fdb_wipe_element_string,
        fdb_delete_wipe_element,
        fdb_delete_wipe_iterator,
        fdb_purge_iterator_next,
        fdb_purge_element_string,
        fdb_delete_purge_element,
        fdb_delete_purge_iterator,
    )
}

unsafe extern "C" fn old_version(version: *mut *const c_char) -> c_int {
    if !version.is_null() {
        *version = c"5.10.0".as_ptr();
    }
    fdb_sys::FDB_SUCCESS
}

/// The mock symbol table, reporting a library version that is too old.
pub fn old_version_symbols() -> Symbols {
    Symbols {
        fdb_version: old_version,
        ..mock_symbols()
    }
}

/// The mock library, initialised.
pub fn mock_library() -> Arc<dyn NativeApi> {
    let library = NativeLibrary::from_symbols(mock_symbols(), MOCK_LIBRARY_LABEL)
        .expect("Failed to initialise mock library");
    Arc::new(library)
}

/// An FDB session over a temporary root, removed on drop.
pub struct TestFdb {
    /// The session.
    pub fdb: Fdb,
    /// Configuration the session was opened with.
    pub config: FdbConfig,
    root: PathBuf,
    _temp_dir: TempDir,
}

impl TestFdb {
    /// Opens a session on the mock library.
    pub fn new() -> Self {
        Self::with_api(mock_library())
    }

    /// Opens a session on `api` over a fresh temporary root.
    pub fn with_api(api: Arc<dyn NativeApi>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).expect("Failed to create FDB root");
        let config = FdbConfig::local(&root);
        let fdb = Fdb::open(api, &FdbOptions::new().config(config.clone()))
            .expect("Failed to open FDB session");
        Self {
            fdb,
            config,
            root,
            _temp_dir: temp_dir,
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for scratch files next to the root.
    pub fn scratch(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Opens a second session on the same root.
    pub fn reopen(&self) -> Fdb {
        Fdb::open(
            Arc::clone(self.fdb.api()),
            &FdbOptions::new().config(self.config.clone()),
        )
        .expect("Failed to reopen FDB session")
    }

    /// Every file and directory below the root.
    pub fn entries(&self) -> Vec<PathBuf> {
        walk(&self.root)
    }
}

impl Default for TestFdb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestFdb {
    type Target = Fdb;

    fn deref(&self) -> &Self::Target {
        &self.fdb
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            }
            out.push(path);
        }
    }
    out.sort();
    out
}

/// [`BASE_REQUEST`] as owned pairs.
pub fn base_request() -> Vec<(String, String)> {
    BASE_REQUEST
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The four distinct keys written by [`populate`]: the base request, a later
/// step, a later date, and a surface field without a level.
pub fn field_keys() -> Vec<Vec<(String, String)>> {
    let with = |name: &str, value: &str| {
        let mut key = base_request();
        if let Some(field) = key.iter_mut().find(|(k, _)| k == name) {
            field.1 = value.to_string();
        }
        key
    };

    let mut surface = with("levtype", "sfc");
    surface.retain(|(k, _)| k != "levelist");

    vec![
        base_request(),
        with("step", "1"),
        with("date", "20000102"),
        surface,
    ]
}

/// Archives [`FIELD_DATA`] under each of [`field_keys`] and flushes.
///
/// Returns the number of fields written.
pub fn populate(fdb: &Fdb) -> FdbResult<usize> {
    let keys = field_keys();
    for key in &keys {
        fdb.archive_key(FIELD_DATA, key.clone())?;
    }
    fdb.flush()?;
    Ok(keys.len())
}

/// A self-describing message carrying its own key.
pub fn message(key: &[(String, String)], payload: &[u8]) -> Vec<u8> {
    encode_message(key, payload)
}

/// Number of fields listed for `request` (everything when `None`).
pub fn count(fdb: &Fdb, request: Option<&str>) -> FdbResult<usize> {
    let mut n = 0;
    for element in fdb.list(request.map(Into::into), ListOptions::default())? {
        element?;
        n += 1;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct() {
        let keys = field_keys();
        assert_eq!(keys.len(), 4);
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(!keys[3].iter().any(|(k, _)| k == "levelist"));
    }

    #[test]
    fn populate_then_list() {
        let test = TestFdb::new();
        assert_eq!(populate(&test).unwrap(), 4);
        assert_eq!(count(&test, None).unwrap(), 4);
        assert_eq!(count(&test, Some("class=rd,date=20000102")).unwrap(), 1);
    }

    #[test]
    fn sessions_share_a_root() {
        let test = TestFdb::new();
        populate(&test).unwrap();
        let other = test.reopen();
        assert_eq!(count(&other, None).unwrap(), 4);
        assert!(!test.entries().is_empty());
    }
}
