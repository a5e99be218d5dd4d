//! Streaming retrieval.

use crate::api::NativeApi;
use crate::error::{FdbError, FdbResult};
use crate::raw::{RawDataReader, RawHandle};
use crate::request::Request;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest number of bytes asked of the library in one read.
pub const READ_PIECE: usize = 16 << 20;

/// A byte stream over retrieved data.
///
/// The stream opens itself on first use of any positional operation, and
/// may be closed any number of times. A closed reader reopens on next use.
/// Only absolute seeks are supported.
pub struct DataReader {
    api: Arc<dyn NativeApi>,
    raw: RawDataReader,
    size: Option<u64>,
}

impl DataReader {
    pub(crate) fn new(
        api: Arc<dyn NativeApi>,
        fdb: RawHandle,
        request: &Request,
    ) -> FdbResult<Self> {
        let raw = api.new_datareader()?;
        let reader = Self {
            api,
            raw,
            size: None,
        };
        reader.api.retrieve(fdb, request.raw(), reader.raw)?;
        debug!(request = %request, "retrieving");
        Ok(reader)
    }

    /// Opens the stream if needed and returns its total size.
    pub fn open(&mut self) -> FdbResult<u64> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let size = self.api.datareader_open(self.raw)?;
        self.size = Some(size);
        Ok(size)
    }

    /// Closes the stream. Closing a closed stream does nothing.
    pub fn close(&mut self) -> FdbResult<()> {
        if self.size.take().is_some() {
            self.api.datareader_close(self.raw)?;
        }
        Ok(())
    }

    /// Returns true while the stream is open.
    pub fn is_open(&self) -> bool {
        self.size.is_some()
    }

    /// Total size of the stream in bytes.
    pub fn size(&mut self) -> FdbResult<u64> {
        self.open()
    }

    /// Current position.
    pub fn tell(&mut self) -> FdbResult<u64> {
        self.open()?;
        self.api.datareader_tell(self.raw)
    }

    /// Moves to an absolute position.
    pub fn seek_to(&mut self, position: u64) -> FdbResult<()> {
        self.open()?;
        self.api.datareader_seek(self.raw, position)
    }

    /// Moves like [`Seek::seek`], accepting only [`SeekFrom::Start`].
    pub fn seek_from(&mut self, position: SeekFrom) -> FdbResult<u64> {
        match position {
            SeekFrom::Start(offset) => {
                self.seek_to(offset)?;
                Ok(offset)
            }
            SeekFrom::Current(_) | SeekFrom::End(_) => Err(FdbError::UnsupportedSeekMode),
        }
    }

    /// Moves forward by `count` bytes.
    pub fn skip(&mut self, count: u64) -> FdbResult<()> {
        self.open()?;
        self.api.datareader_skip(self.raw, count)
    }

    /// Reads up to `count` bytes, or everything remaining when `None`.
    ///
    /// Fewer bytes than asked for are returned at the end of the stream.
    /// The request is capped at what remains and served in pieces of at
    /// most [`READ_PIECE`] bytes.
    pub fn read_chunk(&mut self, count: Option<usize>) -> FdbResult<Vec<u8>> {
        let size = self.open()?;
        let position = self.api.datareader_tell(self.raw)?;
        let remaining = size.saturating_sub(position);
        let wanted = match count {
            Some(count) => remaining.min(count as u64),
            None => remaining,
        };
        let wanted = usize::try_from(wanted)
            .map_err(|_| FdbError::invalid_argument("remaining data does not fit in memory"))?;

        let mut data = Vec::with_capacity(wanted.min(READ_PIECE));
        while data.len() < wanted {
            let piece = (wanted - data.len()).min(READ_PIECE);
            let chunk = self.api.datareader_read(self.raw, piece)?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Reads everything remaining.
    pub fn read_remaining(&mut self) -> FdbResult<Vec<u8>> {
        self.read_chunk(None)
    }
}

impl Read for DataReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.read_chunk(Some(buf.len()))?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl Seek for DataReader {
    fn seek(&mut self, position: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_from(position)?)
    }
}

impl Drop for DataReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close FDB data reader");
        }
        if let Err(e) = self.api.delete_datareader(self.raw) {
            warn!(error = %e, "failed to release FDB data reader");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;

    fn reader(fake: &Arc<FakeApi>) -> DataReader {
        let api: Arc<dyn NativeApi> = fake.clone();
        let request = Request::from_fields(Arc::clone(&api), [("class", "rd")]).unwrap();
        DataReader::new(api, RawHandle::from_raw(1), &request).unwrap()
    }

    #[test]
    fn opens_lazily_and_once() {
        let fake = Arc::new(FakeApi::default().with_data(b"0123456789"));
        let mut reader = reader(&fake);
        assert!(!reader.is_open());
        assert_eq!(reader.read_chunk(Some(4)).unwrap(), b"0123");
        assert_eq!(reader.tell().unwrap(), 4);
        assert_eq!(reader.size().unwrap(), 10);
        let opens = fake.calls().iter().filter(|c| *c == "datareader_open").count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn seek_zero_rewinds() {
        let fake = Arc::new(FakeApi::default().with_data(b"abcdef"));
        let mut reader = reader(&fake);
        let first = reader.read_remaining().unwrap();
        reader.seek_to(0).unwrap();
        assert_eq!(reader.read_remaining().unwrap(), first);
    }

    #[test]
    fn relative_seeks_are_rejected_before_native_call() {
        let fake = Arc::new(FakeApi::default().with_data(b"abc"));
        let mut reader = reader(&fake);
        assert!(matches!(
            reader.seek_from(SeekFrom::Current(1)),
            Err(FdbError::UnsupportedSeekMode)
        ));
        let err = Seek::seek(&mut reader, SeekFrom::End(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(!reader.is_open());
    }

    #[test]
    fn short_read_at_end() {
        let fake = Arc::new(FakeApi::default().with_data(b"abc"));
        let mut reader = reader(&fake);
        reader.skip(2).unwrap();
        assert_eq!(reader.read_chunk(Some(10)).unwrap(), b"c");
        assert!(reader.read_chunk(Some(10)).unwrap().is_empty());
    }

    #[test]
    fn oversized_read_is_capped_at_remaining() {
        let fake = Arc::new(FakeApi::default().with_data(b"abc"));
        let mut reader = reader(&fake);
        assert_eq!(reader.read_chunk(Some(usize::MAX)).unwrap(), b"abc");
        assert!(fake.calls().iter().any(|c| c == "datareader_read 3"));
        assert!(reader.read_chunk(Some(1 << 40)).unwrap().is_empty());
    }

    #[test]
    fn large_reads_are_split_into_pieces() {
        let data = vec![7u8; READ_PIECE + 3];
        let fake = Arc::new(FakeApi::default().with_data(&data));
        let mut reader = reader(&fake);
        assert_eq!(reader.read_remaining().unwrap().len(), READ_PIECE + 3);
        let reads: Vec<String> = fake
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("datareader_read"))
            .collect();
        assert_eq!(
            reads,
            [format!("datareader_read {READ_PIECE}"), "datareader_read 3".to_string()]
        );
    }

    #[test]
    fn io_read_to_end() {
        let fake = Arc::new(FakeApi::default().with_data(b"hello world"));
        let mut reader = reader(&fake);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn close_is_idempotent_and_drop_releases() {
        let fake = Arc::new(FakeApi::default().with_data(b"abc"));
        let mut reader = reader(&fake);
        reader.open().unwrap();
        reader.close().unwrap();
        reader.close().unwrap();
        drop(reader);
        let calls = fake.calls();
        assert_eq!(calls.iter().filter(|c| *c == "datareader_close").count(), 1);
        assert_eq!(calls.last().map(String::as_str), Some("delete_datareader"));
    }

    #[test]
    fn drop_closes_open_reader() {
        let fake = Arc::new(FakeApi::default().with_data(b"abc"));
        let mut reader = reader(&fake);
        reader.open().unwrap();
        drop(reader);
        let calls = fake.calls();
        let n = calls.len();
        assert_eq!(calls[n - 2], "datareader_close");
        assert_eq!(calls[n - 1], "delete_datareader");
    }

    #[test]
    fn failed_retrieve_releases_reader() {
        let fake = Arc::new(FakeApi::default().failing("retrieve"));
        let api: Arc<dyn NativeApi> = fake.clone();
        let request = Request::new(Arc::clone(&api)).unwrap();
        assert!(DataReader::new(api, RawHandle::from_raw(1), &request).is_err());
        assert!(fake.calls().iter().any(|c| c == "delete_datareader"));
    }
}
