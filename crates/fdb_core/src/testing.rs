//! A scripted [`NativeApi`] for unit tests.

use crate::api::NativeApi;
use crate::error::{FdbError, FdbResult};
use crate::raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
use parking_lot::Mutex;
use std::path::Path;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    next_handle: u64,
    data: Vec<u8>,
    position: u64,
    listing: Vec<(ListAttrs, Vec<MetadataField>)>,
    list_cursor: Option<usize>,
    metadata_cursor: usize,
    report: Vec<String>,
    report_cursor: usize,
    failing: Option<&'static str>,
}

/// Records every call by name and serves canned data.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn with_data(self, data: &[u8]) -> Self {
        self.state.lock().data = data.to_vec();
        self
    }

    pub(crate) fn with_listing(self, listing: Vec<(ListAttrs, Vec<MetadataField>)>) -> Self {
        self.state.lock().listing = listing;
        self
    }

    pub(crate) fn with_report(self, lines: &[&str]) -> Self {
        self.state.lock().report = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Makes the named method fail with a native error.
    pub(crate) fn failing(self, method: &'static str) -> Self {
        self.state.lock().failing = Some(method);
        self
    }

    fn record(&self, call: impl Into<String>) -> FdbResult<()> {
        let call = call.into();
        let mut state = self.state.lock();
        let name = call.split(' ').next().unwrap_or_default().to_string();
        state.calls.push(call);
        if state.failing == Some(name.as_str()) {
            return Err(FdbError::native_call(format!("fdb_{name}"), 1, "scripted failure"));
        }
        Ok(())
    }

    fn handle(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_handle += 1;
        state.next_handle
    }
}

impl NativeApi for FakeApi {
    fn library_path(&self) -> &Path {
        Path::new("fake")
    }

    fn version(&self) -> FdbResult<String> {
        Ok("5.13.0".to_string())
    }

    fn vcs_version(&self) -> FdbResult<String> {
        Ok("fake".to_string())
    }

    fn new_handle(&self) -> FdbResult<RawHandle> {
        self.record("new_handle")?;
        Ok(RawHandle::from_raw(self.handle()))
    }

    fn new_handle_from_yaml(&self, config: &str, user_config: &str) -> FdbResult<RawHandle> {
        self.record(format!("new_handle_from_yaml {config}|{user_config}"))?;
        Ok(RawHandle::from_raw(self.handle()))
    }

    fn delete_handle(&self, _fdb: RawHandle) -> FdbResult<()> {
        self.record("delete_handle")
    }

    fn archive(&self, _fdb: RawHandle, _key: RawKey, data: &[u8]) -> FdbResult<()> {
        self.record(format!("archive {}", data.len()))
    }

    fn archive_multiple(
        &self,
        _fdb: RawHandle,
        request: Option<RawRequest>,
        data: &[u8],
    ) -> FdbResult<()> {
        let with = if request.is_some() { "request" } else { "none" };
        self.record(format!("archive_multiple {with} {}", data.len()))
    }

    fn flush(&self, _fdb: RawHandle) -> FdbResult<()> {
        self.record("flush")
    }

    fn new_key(&self) -> FdbResult<RawKey> {
        self.record("new_key")?;
        Ok(RawKey::from_raw(self.handle()))
    }

    fn key_add(&self, _key: RawKey, param: &str, value: &str) -> FdbResult<()> {
        self.record(format!("key_add {param}={value}"))
    }

    fn delete_key(&self, _key: RawKey) -> FdbResult<()> {
        self.record("delete_key")
    }

    fn new_request(&self) -> FdbResult<RawRequest> {
        self.record("new_request")?;
        Ok(RawRequest::from_raw(self.handle()))
    }

    fn request_add(&self, _request: RawRequest, param: &str, values: &[String]) -> FdbResult<()> {
        self.record(format!("request_add {param}={}", values.join("/")))
    }

    fn expand_request(&self, _request: RawRequest) -> FdbResult<()> {
        self.record("expand_request")
    }

    fn delete_request(&self, _request: RawRequest) -> FdbResult<()> {
        self.record("delete_request")
    }

    fn list(
        &self,
        _fdb: RawHandle,
        request: Option<RawRequest>,
        duplicates: bool,
    ) -> FdbResult<RawListIterator> {
        let with = if request.is_some() { "request" } else { "none" };
        self.record(format!("list {with} {duplicates}"))?;
        self.state.lock().list_cursor = None;
        Ok(RawListIterator::from_raw(self.handle()))
    }

    fn listiterator_next(&self, _iterator: RawListIterator) -> FdbResult<Step> {
        self.record("listiterator_next")?;
        let mut state = self.state.lock();
        let next = state.list_cursor.map_or(0, |i| i + 1);
        state.list_cursor = Some(next);
        state.metadata_cursor = 0;
        Ok(if next < state.listing.len() {
            Step::Item
        } else {
            Step::Complete
        })
    }

    fn listiterator_attrs(&self, _iterator: RawListIterator) -> FdbResult<ListAttrs> {
        self.record("listiterator_attrs")?;
        let state = self.state.lock();
        let index = state.list_cursor.unwrap_or_default();
        state
            .listing
            .get(index)
            .map(|(attrs, _)| attrs.clone())
            .ok_or_else(|| FdbError::native_call("fdb_listiterator_attrs", 1, "no element"))
    }

    fn listiterator_splitkey(
        &self,
        _iterator: RawListIterator,
        _key: RawSplitKey,
    ) -> FdbResult<()> {
        self.record("listiterator_splitkey")
    }

    fn delete_listiterator(&self, _iterator: RawListIterator) -> FdbResult<()> {
        self.record("delete_listiterator")
    }

    fn new_splitkey(&self) -> FdbResult<RawSplitKey> {
        self.record("new_splitkey")?;
        Ok(RawSplitKey::from_raw(self.handle()))
    }

    fn splitkey_next_metadata(&self, _key: RawSplitKey) -> FdbResult<Option<MetadataField>> {
        self.record("splitkey_next_metadata")?;
        let mut state = self.state.lock();
        let index = state.list_cursor.unwrap_or_default();
        let cursor = state.metadata_cursor;
        let field = state
            .listing
            .get(index)
            .and_then(|(_, fields)| fields.get(cursor))
            .cloned();
        state.metadata_cursor += 1;
        Ok(field)
    }

    fn delete_splitkey(&self, _key: RawSplitKey) -> FdbResult<()> {
        self.record("delete_splitkey")
    }

    fn new_datareader(&self) -> FdbResult<RawDataReader> {
        self.record("new_datareader")?;
        Ok(RawDataReader::from_raw(self.handle()))
    }

    fn retrieve(
        &self,
        _fdb: RawHandle,
        _request: RawRequest,
        _reader: RawDataReader,
    ) -> FdbResult<()> {
        self.record("retrieve")
    }

    fn datareader_open(&self, _reader: RawDataReader) -> FdbResult<u64> {
        self.record("datareader_open")?;
        let mut state = self.state.lock();
        state.position = 0;
        Ok(state.data.len() as u64)
    }

    fn datareader_close(&self, _reader: RawDataReader) -> FdbResult<()> {
        self.record("datareader_close")
    }

    fn datareader_tell(&self, _reader: RawDataReader) -> FdbResult<u64> {
        self.record("datareader_tell")?;
        Ok(self.state.lock().position)
    }

    fn datareader_seek(&self, _reader: RawDataReader, position: u64) -> FdbResult<()> {
        self.record(format!("datareader_seek {position}"))?;
        self.state.lock().position = position;
        Ok(())
    }

    fn datareader_skip(&self, _reader: RawDataReader, count: u64) -> FdbResult<()> {
        self.record(format!("datareader_skip {count}"))?;
        self.state.lock().position += count;
        Ok(())
    }

    fn datareader_read(&self, _reader: RawDataReader, count: usize) -> FdbResult<Vec<u8>> {
        self.record(format!("datareader_read {count}"))?;
        let mut state = self.state.lock();
        let start = (state.position as usize).min(state.data.len());
        let end = (start + count).min(state.data.len());
        let chunk = state.data[start..end].to_vec();
        state.position = end as u64;
        Ok(chunk)
    }

    fn delete_datareader(&self, _reader: RawDataReader) -> FdbResult<()> {
        self.record("delete_datareader")
    }

    fn wipe(
        &self,
        _fdb: RawHandle,
        _request: RawRequest,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> FdbResult<RawWipeIterator> {
        self.record(format!("wipe {doit} {porcelain} {unsafe_wipe_all}"))?;
        self.state.lock().report_cursor = 0;
        Ok(RawWipeIterator::from_raw(self.handle()))
    }

    fn wipe_iterator_next(&self, _iterator: RawWipeIterator) -> FdbResult<Option<String>> {
        self.record("wipe_iterator_next")?;
        Ok(self.next_report_line())
    }

    fn delete_wipe_iterator(&self, _iterator: RawWipeIterator) -> FdbResult<()> {
        self.record("delete_wipe_iterator")
    }

    fn purge(
        &self,
        _fdb: RawHandle,
        _request: RawRequest,
        doit: bool,
        porcelain: bool,
    ) -> FdbResult<RawPurgeIterator> {
        self.record(format!("purge {doit} {porcelain}"))?;
        self.state.lock().report_cursor = 0;
        Ok(RawPurgeIterator::from_raw(self.handle()))
    }

    fn purge_iterator_next(&self, _iterator: RawPurgeIterator) -> FdbResult<Option<String>> {
        self.record("purge_iterator_next")?;
        Ok(self.next_report_line())
    }

    fn delete_purge_iterator(&self, _iterator: RawPurgeIterator) -> FdbResult<()> {
        self.record("delete_purge_iterator")
    }
}

impl FakeApi {
    fn next_report_line(&self) -> Option<String> {
        let mut state = self.state.lock();
        let line = state.report.get(state.report_cursor).cloned();
        state.report_cursor += 1;
        line
    }
}
