//! The `libfdb5` C entry points, backed by [`Store`].
//!
//! Every function has exactly the signature declared in
//! [`fdb_sys::Symbols`], so the table can be filled in directly (see
//! [`crate::mock_symbols`]) or resolved from the `cdylib` build of this
//! crate with `dlopen`.

#![allow(missing_docs)]

use crate::error::{guard, last_error_ptr, ok, MockError, MockResult};
use crate::store::{self, Fields, Listed, Selection, Store};
use fdb_sys::*;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ffi::{c_char, c_int, c_long, c_void, CStr, CString};

/// Version reported by the mock library.
pub const MOCK_VERSION: &str = "5.13.2";

static VERSION: &CStr = c"5.13.2";
static VCS_VERSION: &CStr = c"mock";

struct MockHandle {
    store: Mutex<Store>,
}

#[derive(Default)]
struct MockKey {
    fields: Fields,
}

#[derive(Default)]
struct MockRequest {
    fields: Selection,
}

struct Current {
    path: CString,
    offset: u64,
    length: u64,
    key: Fields,
}

struct MockListIterator {
    pending: VecDeque<Listed>,
    current: Option<Current>,
}

#[derive(Default)]
struct MockSplitKey {
    fields: Vec<(CString, CString, usize)>,
    cursor: usize,
}

#[derive(Default)]
struct MockDataReader {
    data: Option<Vec<u8>>,
    open: bool,
    position: usize,
}

struct MockReportIterator {
    lines: VecDeque<CString>,
}

struct MockReportElement {
    text: CString,
}

unsafe fn object<'a, T, O>(ptr: *mut O, what: &'static str) -> MockResult<&'a mut T> {
    if ptr.is_null() {
        return Err(MockError::NullPointer(what));
    }
    Ok(&mut *(ptr as *mut T))
}

unsafe fn release<T, O>(ptr: *mut O) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr as *mut T));
    }
}

unsafe fn emit<T, O>(out: *mut *mut O, value: T, what: &'static str) -> MockResult<()> {
    if out.is_null() {
        return Err(MockError::NullPointer(what));
    }
    *out = Box::into_raw(Box::new(value)) as *mut O;
    Ok(())
}

unsafe fn text<'a>(ptr: *const c_char, what: &'static str) -> MockResult<&'a str> {
    if ptr.is_null() {
        return Err(MockError::NullPointer(what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| MockError::InvalidUtf8(what))
}

unsafe fn bytes<'a>(data: *const c_char, length: usize) -> MockResult<&'a [u8]> {
    if length == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(MockError::NullPointer("data"));
    }
    Ok(std::slice::from_raw_parts(data as *const u8, length))
}

fn c_text(value: &str) -> CString {
    CString::new(value.replace('\0', " ")).unwrap_or_default()
}

fn c_long_of(value: usize) -> c_long {
    c_long::try_from(value).unwrap_or(c_long::MAX)
}

fn report(lines: Vec<String>) -> MockReportIterator {
    MockReportIterator {
        lines: lines.iter().map(|l| c_text(l)).collect(),
    }
}

// ============================================================================
// Library
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn fdb_initialise() -> c_int {
    guard(ok)
}

#[no_mangle]
pub unsafe extern "C" fn fdb_version(version: *mut *const c_char) -> c_int {
    guard(|| {
        if version.is_null() {
            return Err(MockError::NullPointer("version"));
        }
        *version = VERSION.as_ptr();
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_vcs_version(sha: *mut *const c_char) -> c_int {
    guard(|| {
        if sha.is_null() {
            return Err(MockError::NullPointer("sha"));
        }
        *sha = VCS_VERSION.as_ptr();
        ok()
    })
}

/// Returns the message of the last failed call on this thread.
#[no_mangle]
pub unsafe extern "C" fn fdb_error_string(_code: c_int) -> *const c_char {
    last_error_ptr()
}

// ============================================================================
// Handles
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn fdb_new_handle(fdb: *mut *mut fdb_handle_t) -> c_int {
    guard(|| {
        let store = Store::from_config("")?;
        emit(fdb, MockHandle { store: Mutex::new(store) }, "fdb")?;
        ok()
    })
}

/// Configuration text is JSON, which is also valid YAML.
#[no_mangle]
pub unsafe extern "C" fn fdb_new_handle_from_yaml(
    fdb: *mut *mut fdb_handle_t,
    system_config: *const c_char,
    _user_config: *const c_char,
) -> c_int {
    guard(|| {
        let config = text(system_config, "system_config")?;
        let store = Store::from_config(config)?;
        emit(fdb, MockHandle { store: Mutex::new(store) }, "fdb")?;
        ok()
    })
}

/// Flushes pending fields before releasing the handle.
#[no_mangle]
pub unsafe extern "C" fn fdb_delete_handle(fdb: *mut fdb_handle_t) -> c_int {
    guard(|| {
        if fdb.is_null() {
            return ok();
        }
        let handle = Box::from_raw(fdb as *mut MockHandle);
        handle.store.lock().flush()?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_archive(
    fdb: *mut fdb_handle_t,
    key: *mut fdb_key_t,
    data: *const c_char,
    length: usize,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let key: &mut MockKey = object(key, "key")?;
        let data = bytes(data, length)?;
        handle.store.lock().archive(key.fields.clone(), data)?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_archive_multiple(
    fdb: *mut fdb_handle_t,
    req: *mut fdb_request_t,
    data: *const c_char,
    length: usize,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let request = if req.is_null() {
            None
        } else {
            let request: &mut MockRequest = object(req, "req")?;
            Some(&request.fields)
        };
        let data = bytes(data, length)?;
        handle.store.lock().archive_messages(data, request)?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_flush(fdb: *mut fdb_handle_t) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        handle.store.lock().flush()?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_list(
    fdb: *mut fdb_handle_t,
    req: *const fdb_request_t,
    it: *mut *mut fdb_listiterator_t,
    duplicates: bool,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let request = if req.is_null() {
            None
        } else {
            let request: &mut MockRequest = object(req.cast_mut(), "req")?;
            Some(&request.fields)
        };
        let listed = handle.store.lock().list(request, duplicates)?;
        emit(
            it,
            MockListIterator {
                pending: listed.into(),
                current: None,
            },
            "it",
        )?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_retrieve(
    fdb: *mut fdb_handle_t,
    req: *mut fdb_request_t,
    dr: *mut fdb_datareader_t,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let request: &mut MockRequest = object(req, "req")?;
        let reader: &mut MockDataReader = object(dr, "dr")?;
        let data = handle.store.lock().retrieve(&request.fields)?;
        *reader = MockDataReader {
            data: Some(data),
            open: false,
            position: 0,
        };
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_wipe(
    fdb: *mut fdb_handle_t,
    req: *mut fdb_request_t,
    doit: bool,
    porcelain: bool,
    unsafe_wipe_all: bool,
    it: *mut *mut fdb_wipe_iterator_t,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let request: &mut MockRequest = object(req, "req")?;
        let lines = handle
            .store
            .lock()
            .wipe(&request.fields, doit, porcelain, unsafe_wipe_all)?;
        emit(it, report(lines), "it")?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_purge(
    fdb: *mut fdb_handle_t,
    req: *mut fdb_request_t,
    doit: bool,
    porcelain: bool,
    it: *mut *mut fdb_purge_iterator_t,
) -> c_int {
    guard(|| {
        let handle: &mut MockHandle = object(fdb, "fdb")?;
        let request: &mut MockRequest = object(req, "req")?;
        let lines = handle.store.lock().purge(&request.fields, doit, porcelain)?;
        emit(it, report(lines), "it")?;
        ok()
    })
}

// ============================================================================
// Keys and requests
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn fdb_new_key(key: *mut *mut fdb_key_t) -> c_int {
    guard(|| {
        emit(key, MockKey::default(), "key")?;
        ok()
    })
}

/// Repeated parameters replace the earlier value.
#[no_mangle]
pub unsafe extern "C" fn fdb_key_add(
    key: *mut fdb_key_t,
    param: *const c_char,
    value: *const c_char,
) -> c_int {
    guard(|| {
        let key: &mut MockKey = object(key, "key")?;
        let param = text(param, "param")?;
        let value = text(value, "value")?;
        key.fields.insert(param.to_string(), value.to_string());
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_key(key: *mut fdb_key_t) -> c_int {
    guard(|| {
        release::<MockKey, _>(key);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_new_request(req: *mut *mut fdb_request_t) -> c_int {
    guard(|| {
        emit(req, MockRequest::default(), "req")?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_request_add(
    req: *mut fdb_request_t,
    param: *const c_char,
    values: *const *const c_char,
    num_values: c_int,
) -> c_int {
    guard(|| {
        let request: &mut MockRequest = object(req, "req")?;
        let param = text(param, "param")?;
        let count = usize::try_from(num_values)
            .map_err(|_| MockError::state(format!("negative value count {num_values}")))?;
        if count > 0 && values.is_null() {
            return Err(MockError::NullPointer("values"));
        }
        let mut parsed = Vec::with_capacity(count);
        for i in 0..count {
            parsed.push(text(*values.add(i), "values")?.to_string());
        }
        match request.fields.iter_mut().find(|(name, _)| name == param) {
            Some((_, existing)) => *existing = parsed,
            None => request.fields.push((param.to_string(), parsed)),
        }
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_expand_request(req: *mut fdb_request_t) -> c_int {
    guard(|| {
        let request: &mut MockRequest = object(req, "req")?;
        store::expand(&mut request.fields);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_request(req: *mut fdb_request_t) -> c_int {
    guard(|| {
        release::<MockRequest, _>(req);
        ok()
    })
}

// ============================================================================
// Listing
// ============================================================================

#[no_mangle]
pub unsafe extern "C" fn fdb_listiterator_next(it: *mut fdb_listiterator_t) -> c_int {
    guard(|| {
        let iterator: &mut MockListIterator = object(it, "it")?;
        iterator.current = iterator.pending.pop_front().map(|listed| Current {
            path: c_text(&listed.path.to_string_lossy()),
            offset: listed.offset,
            length: listed.length,
            key: listed.key,
        });
        Ok(if iterator.current.is_some() {
            FDB_SUCCESS
        } else {
            FDB_ITERATION_COMPLETE
        })
    })
}

/// The path stays valid until the iterator advances.
#[no_mangle]
pub unsafe extern "C" fn fdb_listiterator_attrs(
    it: *mut fdb_listiterator_t,
    uri: *mut *const c_char,
    off: *mut usize,
    len: *mut usize,
) -> c_int {
    guard(|| {
        let iterator: &mut MockListIterator = object(it, "it")?;
        let current = iterator
            .current
            .as_ref()
            .ok_or_else(|| MockError::state("list iterator is not positioned on an element"))?;
        if uri.is_null() || off.is_null() || len.is_null() {
            return Err(MockError::NullPointer("attrs"));
        }
        *uri = current.path.as_ptr();
        *off = current.offset as usize;
        *len = current.length as usize;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_listiterator_splitkey(
    it: *mut fdb_listiterator_t,
    key: *mut fdb_split_key_t,
) -> c_int {
    guard(|| {
        let iterator: &mut MockListIterator = object(it, "it")?;
        let split: &mut MockSplitKey = object(key, "key")?;
        let current = iterator
            .current
            .as_ref()
            .ok_or_else(|| MockError::state("list iterator is not positioned on an element"))?;
        split.fields = store::schema_order(&current.key)
            .into_iter()
            .map(|(k, v, level)| (c_text(k), c_text(v), level))
            .collect();
        split.cursor = 0;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_listiterator(it: *mut fdb_listiterator_t) -> c_int {
    guard(|| {
        release::<MockListIterator, _>(it);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_new_splitkey(key: *mut *mut fdb_split_key_t) -> c_int {
    guard(|| {
        emit(key, MockSplitKey::default(), "key")?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_splitkey_next_metadata(
    it: *mut fdb_split_key_t,
    key: *mut *const c_char,
    value: *mut *const c_char,
    level: *mut usize,
) -> c_int {
    guard(|| {
        let split: &mut MockSplitKey = object(it, "it")?;
        let Some((k, v, l)) = split.fields.get(split.cursor) else {
            return Ok(FDB_ITERATION_COMPLETE);
        };
        if key.is_null() || value.is_null() || level.is_null() {
            return Err(MockError::NullPointer("metadata"));
        }
        *key = k.as_ptr();
        *value = v.as_ptr();
        *level = *l;
        split.cursor += 1;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_splitkey(key: *mut fdb_split_key_t) -> c_int {
    guard(|| {
        release::<MockSplitKey, _>(key);
        ok()
    })
}

// ============================================================================
// Data readers
// ============================================================================

impl MockDataReader {
    fn opened(&self) -> MockResult<&[u8]> {
        if !self.open {
            return Err(MockError::state("data reader is not open"));
        }
        self.data
            .as_deref()
            .ok_or_else(|| MockError::state("data reader is not bound to a retrieval"))
    }
}

#[no_mangle]
pub unsafe extern "C" fn fdb_new_datareader(dr: *mut *mut fdb_datareader_t) -> c_int {
    guard(|| {
        emit(dr, MockDataReader::default(), "dr")?;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_open(dr: *mut fdb_datareader_t, size: *mut c_long) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        let length = reader
            .data
            .as_ref()
            .map(Vec::len)
            .ok_or_else(|| MockError::state("data reader is not bound to a retrieval"))?;
        reader.open = true;
        reader.position = 0;
        if !size.is_null() {
            *size = c_long_of(length);
        }
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_close(dr: *mut fdb_datareader_t) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        reader.open = false;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_tell(dr: *mut fdb_datareader_t, pos: *mut c_long) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        reader.opened()?;
        if pos.is_null() {
            return Err(MockError::NullPointer("pos"));
        }
        *pos = c_long_of(reader.position);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_seek(dr: *mut fdb_datareader_t, pos: c_long) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        let size = reader.opened()?.len();
        let position = usize::try_from(pos)
            .ok()
            .filter(|p| *p <= size)
            .ok_or_else(|| MockError::state(format!("seek to {pos} outside 0..={size}")))?;
        reader.position = position;
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_skip(dr: *mut fdb_datareader_t, count: c_long) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        let size = reader.opened()?.len();
        let count = usize::try_from(count)
            .map_err(|_| MockError::state(format!("cannot skip {count} bytes")))?;
        reader.position = reader.position.saturating_add(count).min(size);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_datareader_read(
    dr: *mut fdb_datareader_t,
    buf: *mut c_void,
    count: c_long,
    read: *mut c_long,
) -> c_int {
    guard(|| {
        let reader: &mut MockDataReader = object(dr, "dr")?;
        let position = reader.position;
        let data = reader.opened()?;
        let wanted = usize::try_from(count).unwrap_or(0);
        let available = data.len().saturating_sub(position);
        let n = wanted.min(available);
        if n > 0 {
            if buf.is_null() {
                return Err(MockError::NullPointer("buf"));
            }
            std::ptr::copy_nonoverlapping(data[position..].as_ptr(), buf as *mut u8, n);
        }
        reader.position += n;
        if !read.is_null() {
            *read = c_long_of(n);
        }
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_datareader(dr: *mut fdb_datareader_t) -> c_int {
    guard(|| {
        release::<MockDataReader, _>(dr);
        ok()
    })
}

// ============================================================================
// Wipe and purge reports
// ============================================================================

unsafe fn next_line<I, E>(it: *mut I, element: *mut *mut E) -> MockResult<c_int> {
    let iterator: &mut MockReportIterator = object(it, "it")?;
    let Some(text) = iterator.lines.pop_front() else {
        return Ok(FDB_ITERATION_COMPLETE);
    };
    emit(element, MockReportElement { text }, "element")?;
    ok()
}

unsafe fn line_text<E>(element: *mut E, str: *mut *const c_char) -> MockResult<c_int> {
    let element: &mut MockReportElement = object(element, "element")?;
    if str.is_null() {
        return Err(MockError::NullPointer("str"));
    }
    *str = element.text.as_ptr();
    ok()
}

#[no_mangle]
pub unsafe extern "C" fn fdb_wipe_iterator_next(
    it: *mut fdb_wipe_iterator_t,
    element: *mut *mut fdb_wipe_element_t,
) -> c_int {
    guard(|| next_line(it, element))
}

#[no_mangle]
pub unsafe extern "C" fn fdb_wipe_element_string(
    element: *mut fdb_wipe_element_t,
    str: *mut *const c_char,
) -> c_int {
    guard(|| line_text(element, str))
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_wipe_element(element: *mut fdb_wipe_element_t) -> c_int {
    guard(|| {
        release::<MockReportElement, _>(element);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_wipe_iterator(it: *mut fdb_wipe_iterator_t) -> c_int {
    guard(|| {
        release::<MockReportIterator, _>(it);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_purge_iterator_next(
    it: *mut fdb_purge_iterator_t,
    element: *mut *mut fdb_purge_element_t,
) -> c_int {
    guard(|| next_line(it, element))
}

#[no_mangle]
pub unsafe extern "C" fn fdb_purge_element_string(
    element: *mut fdb_purge_element_t,
    str: *mut *const c_char,
) -> c_int {
    guard(|| line_text(element, str))
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_purge_element(element: *mut fdb_purge_element_t) -> c_int {
    guard(|| {
        release::<MockReportElement, _>(element);
        ok()
    })
}

#[no_mangle]
pub unsafe extern "C" fn fdb_delete_purge_iterator(it: *mut fdb_purge_iterator_t) -> c_int {
    guard(|| {
        release::<MockReportIterator, _>(it);
        ok()
    })
}
