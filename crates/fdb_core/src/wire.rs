//! Messages exchanged with an `fdb-worker` process.
//!
//! Each frame is a little-endian `u32` length followed by that many bytes
//! of CBOR. The client writes one [`Call`] and reads back one [`Reply`].

use crate::error::{FdbError, FdbResult};
use crate::version::MIN_FDB_VERSION;
use crate::raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Largest frame accepted in either direction.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// One native call, named after its [`NativeApi`](crate::NativeApi) method.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    Version,
    VcsVersion,
    NewHandle,
    NewHandleFromYaml {
        config: String,
        user_config: String,
    },
    DeleteHandle(RawHandle),
    Archive {
        fdb: RawHandle,
        key: RawKey,
        #[serde(with = "byte_string")]
        data: Vec<u8>,
    },
    ArchiveMultiple {
        fdb: RawHandle,
        request: Option<RawRequest>,
        #[serde(with = "byte_string")]
        data: Vec<u8>,
    },
    Flush(RawHandle),
    NewKey,
    KeyAdd {
        key: RawKey,
        param: String,
        value: String,
    },
    DeleteKey(RawKey),
    NewRequest,
    RequestAdd {
        request: RawRequest,
        param: String,
        values: Vec<String>,
    },
    ExpandRequest(RawRequest),
    DeleteRequest(RawRequest),
    List {
        fdb: RawHandle,
        request: Option<RawRequest>,
        duplicates: bool,
    },
    ListIteratorNext(RawListIterator),
    ListIteratorAttrs(RawListIterator),
    ListIteratorSplitKey {
        iterator: RawListIterator,
        key: RawSplitKey,
    },
    DeleteListIterator(RawListIterator),
    NewSplitKey,
    SplitKeyNextMetadata(RawSplitKey),
    DeleteSplitKey(RawSplitKey),
    NewDataReader,
    Retrieve {
        fdb: RawHandle,
        request: RawRequest,
        reader: RawDataReader,
    },
    DataReaderOpen(RawDataReader),
    DataReaderClose(RawDataReader),
    DataReaderTell(RawDataReader),
    DataReaderSeek {
        reader: RawDataReader,
        position: u64,
    },
    DataReaderSkip {
        reader: RawDataReader,
        count: u64,
    },
    DataReaderRead {
        reader: RawDataReader,
        count: u64,
    },
    DeleteDataReader(RawDataReader),
    Wipe {
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    },
    WipeIteratorNext(RawWipeIterator),
    DeleteWipeIterator(RawWipeIterator),
    Purge {
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
    },
    PurgeIteratorNext(RawPurgeIterator),
    DeletePurgeIterator(RawPurgeIterator),
}

impl Call {
    /// Method name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::VcsVersion => "vcs_version",
            Self::NewHandle => "new_handle",
            Self::NewHandleFromYaml { .. } => "new_handle_from_yaml",
            Self::DeleteHandle(_) => "delete_handle",
            Self::Archive { .. } => "archive",
            Self::ArchiveMultiple { .. } => "archive_multiple",
            Self::Flush(_) => "flush",
            Self::NewKey => "new_key",
            Self::KeyAdd { .. } => "key_add",
            Self::DeleteKey(_) => "delete_key",
            Self::NewRequest => "new_request",
            Self::RequestAdd { .. } => "request_add",
            Self::ExpandRequest(_) => "expand_request",
            Self::DeleteRequest(_) => "delete_request",
            Self::List { .. } => "list",
            Self::ListIteratorNext(_) => "listiterator_next",
            Self::ListIteratorAttrs(_) => "listiterator_attrs",
            Self::ListIteratorSplitKey { .. } => "listiterator_splitkey",
            Self::DeleteListIterator(_) => "delete_listiterator",
            Self::NewSplitKey => "new_splitkey",
            Self::SplitKeyNextMetadata(_) => "splitkey_next_metadata",
            Self::DeleteSplitKey(_) => "delete_splitkey",
            Self::NewDataReader => "new_datareader",
            Self::Retrieve { .. } => "retrieve",
            Self::DataReaderOpen(_) => "datareader_open",
            Self::DataReaderClose(_) => "datareader_close",
            Self::DataReaderTell(_) => "datareader_tell",
            Self::DataReaderSeek { .. } => "datareader_seek",
            Self::DataReaderSkip { .. } => "datareader_skip",
            Self::DataReaderRead { .. } => "datareader_read",
            Self::DeleteDataReader(_) => "delete_datareader",
            Self::Wipe { .. } => "wipe",
            Self::WipeIteratorNext(_) => "wipe_iterator_next",
            Self::DeleteWipeIterator(_) => "delete_wipe_iterator",
            Self::Purge { .. } => "purge",
            Self::PurgeIteratorNext(_) => "purge_iterator_next",
            Self::DeletePurgeIterator(_) => "delete_purge_iterator",
        }
    }
}

/// The result of one [`Call`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Done,
    Text(String),
    Handle(RawHandle),
    Key(RawKey),
    Request(RawRequest),
    ListIterator(RawListIterator),
    SplitKey(RawSplitKey),
    DataReader(RawDataReader),
    WipeIterator(RawWipeIterator),
    PurgeIterator(RawPurgeIterator),
    Step(Step),
    Attrs(ListAttrs),
    Metadata(Option<MetadataField>),
    Position(u64),
    Bytes(#[serde(with = "byte_string")] Vec<u8>),
    Line(Option<String>),
    Failed(WireError),
}

impl Reply {
    /// Builds a reply from a call outcome.
    pub fn from_result<T>(result: FdbResult<T>, ok: impl FnOnce(T) -> Reply) -> Reply {
        match result {
            Ok(value) => ok(value),
            Err(e) => Reply::Failed(WireError::from(&e)),
        }
    }
}

/// An error raised inside the worker, in a form that survives the trip back.
///
/// Load failures keep their own shape so that a proxied library reports the
/// same [`FdbError`] variants as one loaded in-process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum WireError {
    /// A native call failed.
    #[error("{function}: {message}")]
    NativeCall {
        /// Native function name.
        function: String,
        /// Status code returned.
        code: i32,
        /// Message reported by the library.
        message: String,
    },

    /// An argument was rejected.
    #[error("{message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The worker found no library.
    #[error("library not found")]
    LibraryNotFound {
        /// Locations that were probed.
        searched: Vec<PathBuf>,
    },

    /// The worker could not load its library.
    #[error("{message}")]
    LibraryLoad {
        /// Library path.
        path: PathBuf,
        /// Loader message.
        message: String,
    },

    /// The worker's library lacks an entry point.
    #[error("{message}")]
    MissingSymbol {
        /// Name of the missing symbol.
        symbol: String,
        /// Loader message.
        message: String,
    },

    /// The worker's library is too old.
    #[error("version {found} is too old")]
    IncompatibleVersion {
        /// Version reported by the library.
        found: String,
        /// Library path.
        path: PathBuf,
    },

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Rendered error.
        message: String,
    },
}

impl From<&FdbError> for WireError {
    fn from(error: &FdbError) -> Self {
        match error {
            FdbError::NativeCall {
                function,
                code,
                message,
            } => Self::NativeCall {
                function: function.clone(),
                code: *code,
                message: message.clone(),
            },
            FdbError::InvalidArgument { message } => Self::InvalidArgument {
                message: message.clone(),
            },
            FdbError::LibraryNotFound { searched } => Self::LibraryNotFound {
                searched: searched.clone(),
            },
            FdbError::LibraryLoad { path, source } => Self::LibraryLoad {
                path: path.clone(),
                message: source.to_string(),
            },
            FdbError::MissingSymbol(e) => Self::MissingSymbol {
                symbol: e.symbol.clone(),
                message: e.source.to_string(),
            },
            FdbError::IncompatibleVersion { found, path, .. } => Self::IncompatibleVersion {
                found: found.clone(),
                path: path.clone(),
            },
            other => Self::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for FdbError {
    fn from(error: WireError) -> Self {
        match error {
            WireError::NativeCall {
                function,
                code,
                message,
            } => FdbError::NativeCall {
                function,
                code,
                message,
            },
            WireError::InvalidArgument { message } => FdbError::invalid_argument(message),
            WireError::LibraryNotFound { searched } => FdbError::LibraryNotFound { searched },
            WireError::LibraryLoad { path, message } => FdbError::LibraryLoad {
                path,
                source: message.into(),
            },
            WireError::MissingSymbol { symbol, message } => {
                FdbError::MissingSymbol(fdb_sys::SymbolError {
                    symbol,
                    source: message.into(),
                })
            }
            WireError::IncompatibleVersion { found, path } => FdbError::IncompatibleVersion {
                found,
                required: MIN_FDB_VERSION,
                path,
            },
            WireError::Other { message } => FdbError::worker(message),
        }
    }
}

/// Writes one frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> FdbResult<()> {
    let mut body = Vec::new();
    ciborium::into_writer(message, &mut body)
        .map_err(|e| FdbError::protocol(format!("encode failed: {e}")))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FdbError::protocol(format!(
            "frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| FdbError::protocol("frame length overflow"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. Returns `None` on a clean end of stream.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> FdbResult<Option<T>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FdbError::protocol(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    ciborium::from_reader(body.as_slice())
        .map(Some)
        .map_err(|e| FdbError::protocol(format!("decode failed: {e}")))
}

/// Encodes `Vec<u8>` as a CBOR byte string rather than an array.
mod byte_string {
    use serde::de::{SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E>(self, v: &[u8]) -> Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}
