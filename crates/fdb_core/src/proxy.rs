//! Serving the native API from another process.
//!
//! The library keeps process-wide state, so a second, different library
//! cannot be initialised next to the first. [`WorkerProxy`] forwards every
//! call to an `fdb-worker` process that owns its own copy, and [`serve`] is
//! the loop that process runs.

use crate::api::NativeApi;
use crate::error::{FdbError, FdbResult};
use crate::raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
use crate::reader::READ_PIECE;
use crate::wire::{read_frame, write_frame, Call, Reply, WireError};
use parking_lot::Mutex;
use std::env;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

/// Environment variable naming the worker program.
pub const WORKER_PROGRAM_VARIABLE: &str = "FDB_WORKER_PROGRAM";

/// File name of the worker program.
pub const WORKER_PROGRAM: &str = "fdb-worker";

/// Finds the worker program.
///
/// `$FDB_WORKER_PROGRAM` wins, then a worker next to the running
/// executable, then whatever `PATH` resolves.
pub fn worker_program() -> PathBuf {
    if let Some(program) = env::var_os(WORKER_PROGRAM_VARIABLE) {
        return PathBuf::from(program);
    }
    let name = format!("{WORKER_PROGRAM}{}", env::consts::EXE_SUFFIX);
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = dir.join(&name);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(name)
}

struct Channel {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

/// A [`NativeApi`] whose calls run in a worker process.
///
/// Calls are serialised; each costs one round trip.
pub struct WorkerProxy {
    library: PathBuf,
    channel: Mutex<Option<Channel>>,
    child: Option<Child>,
}

macro_rules! expect {
    ($proxy:expr, $call:expr, $pattern:pat => $value:expr) => {
        match $proxy.call($call)? {
            $pattern => Ok($value),
            other => Err(unexpected(&other)),
        }
    };
}

fn unexpected(reply: &Reply) -> FdbError {
    FdbError::protocol(format!("unexpected reply {reply:?}"))
}

impl WorkerProxy {
    /// Starts `program --library <library>` and checks that it loaded.
    pub fn spawn(program: &Path, library: &Path) -> FdbResult<Self> {
        let mut child = Command::new(program)
            .arg("--library")
            .arg(library)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                FdbError::worker(format!("cannot start {}: {e}", program.display()))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(FdbError::worker("worker has no standard streams"));
        };
        debug!(
            program = %program.display(),
            library = %library.display(),
            pid = child.id(),
            "spawned FDB worker"
        );

        let proxy = Self {
            library: library.to_path_buf(),
            channel: Mutex::new(Some(Channel {
                reader: Box::new(BufReader::new(stdout)),
                writer: Box::new(BufWriter::new(stdin)),
            })),
            child: Some(child),
        };
        proxy.version()?;
        Ok(proxy)
    }

    /// Talks to a worker over existing streams.
    pub fn from_streams<R, W>(library: impl Into<PathBuf>, reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            library: library.into(),
            channel: Mutex::new(Some(Channel {
                reader: Box::new(reader),
                writer: Box::new(writer),
            })),
            child: None,
        }
    }

    fn call(&self, call: Call) -> FdbResult<Reply> {
        let mut guard = self.channel.lock();
        let channel = guard
            .as_mut()
            .ok_or_else(|| FdbError::worker("worker channel is closed"))?;
        let name = call.name();
        // Oversized calls are refused before anything is written.
        let outcome = match write_frame(&mut channel.writer, &call) {
            Err(e @ FdbError::Protocol { .. }) => return Err(e),
            written => written.and_then(|()| read_frame::<_, Reply>(&mut channel.reader)),
        };
        match outcome {
            Ok(Some(Reply::Failed(error))) => Err(error.into()),
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => {
                *guard = None;
                Err(FdbError::worker(format!("worker exited during {name}")))
            }
            Err(e) => {
                // The stream may be mid-frame; nothing after this can be trusted.
                *guard = None;
                warn!(call = name, error = %e, "dropping FDB worker channel");
                Err(e)
            }
        }
    }
}

impl Drop for WorkerProxy {
    fn drop(&mut self) {
        self.channel.get_mut().take();
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) if !status.success() => {
                    warn!(%status, "FDB worker exited with failure");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to reap FDB worker"),
            }
        }
    }
}

impl std::fmt::Debug for WorkerProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProxy")
            .field("library", &self.library)
            .field("pid", &self.child.as_ref().map(Child::id))
            .finish()
    }
}

impl NativeApi for WorkerProxy {
    fn library_path(&self) -> &Path {
        &self.library
    }

    fn version(&self) -> FdbResult<String> {
        expect!(self, Call::Version, Reply::Text(v) => v)
    }

    fn vcs_version(&self) -> FdbResult<String> {
        expect!(self, Call::VcsVersion, Reply::Text(v) => v)
    }

    fn new_handle(&self) -> FdbResult<RawHandle> {
        expect!(self, Call::NewHandle, Reply::Handle(h) => h)
    }

    fn new_handle_from_yaml(&self, config: &str, user_config: &str) -> FdbResult<RawHandle> {
        let call = Call::NewHandleFromYaml {
            config: config.to_string(),
            user_config: user_config.to_string(),
        };
        expect!(self, call, Reply::Handle(h) => h)
    }

    fn delete_handle(&self, fdb: RawHandle) -> FdbResult<()> {
        expect!(self, Call::DeleteHandle(fdb), Reply::Done => ())
    }

    fn archive(&self, fdb: RawHandle, key: RawKey, data: &[u8]) -> FdbResult<()> {
        let call = Call::Archive {
            fdb,
            key,
            data: data.to_vec(),
        };
        expect!(self, call, Reply::Done => ())
    }

    fn archive_multiple(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        data: &[u8],
    ) -> FdbResult<()> {
        let call = Call::ArchiveMultiple {
            fdb,
            request,
            data: data.to_vec(),
        };
        expect!(self, call, Reply::Done => ())
    }

    fn flush(&self, fdb: RawHandle) -> FdbResult<()> {
        expect!(self, Call::Flush(fdb), Reply::Done => ())
    }

    fn new_key(&self) -> FdbResult<RawKey> {
        expect!(self, Call::NewKey, Reply::Key(k) => k)
    }

    fn key_add(&self, key: RawKey, param: &str, value: &str) -> FdbResult<()> {
        let call = Call::KeyAdd {
            key,
            param: param.to_string(),
            value: value.to_string(),
        };
        expect!(self, call, Reply::Done => ())
    }

    fn delete_key(&self, key: RawKey) -> FdbResult<()> {
        expect!(self, Call::DeleteKey(key), Reply::Done => ())
    }

    fn new_request(&self) -> FdbResult<RawRequest> {
        expect!(self, Call::NewRequest, Reply::Request(r) => r)
    }

    fn request_add(&self, request: RawRequest, param: &str, values: &[String]) -> FdbResult<()> {
        let call = Call::RequestAdd {
            request,
            param: param.to_string(),
            values: values.to_vec(),
        };
        expect!(self, call, Reply::Done => ())
    }

    fn expand_request(&self, request: RawRequest) -> FdbResult<()> {
        expect!(self, Call::ExpandRequest(request), Reply::Done => ())
    }

    fn delete_request(&self, request: RawRequest) -> FdbResult<()> {
        expect!(self, Call::DeleteRequest(request), Reply::Done => ())
    }

    fn list(
        &self,
        fdb: RawHandle,
        request: Option<RawRequest>,
        duplicates: bool,
    ) -> FdbResult<RawListIterator> {
        let call = Call::List {
            fdb,
            request,
            duplicates,
        };
        expect!(self, call, Reply::ListIterator(it) => it)
    }

    fn listiterator_next(&self, iterator: RawListIterator) -> FdbResult<Step> {
        expect!(self, Call::ListIteratorNext(iterator), Reply::Step(s) => s)
    }

    fn listiterator_attrs(&self, iterator: RawListIterator) -> FdbResult<ListAttrs> {
        expect!(self, Call::ListIteratorAttrs(iterator), Reply::Attrs(a) => a)
    }

    fn listiterator_splitkey(
        &self,
        iterator: RawListIterator,
        key: RawSplitKey,
    ) -> FdbResult<()> {
        let call = Call::ListIteratorSplitKey { iterator, key };
        expect!(self, call, Reply::Done => ())
    }

    fn delete_listiterator(&self, iterator: RawListIterator) -> FdbResult<()> {
        expect!(self, Call::DeleteListIterator(iterator), Reply::Done => ())
    }

    fn new_splitkey(&self) -> FdbResult<RawSplitKey> {
        expect!(self, Call::NewSplitKey, Reply::SplitKey(k) => k)
    }

    fn splitkey_next_metadata(&self, key: RawSplitKey) -> FdbResult<Option<MetadataField>> {
        expect!(self, Call::SplitKeyNextMetadata(key), Reply::Metadata(m) => m)
    }

    fn delete_splitkey(&self, key: RawSplitKey) -> FdbResult<()> {
        expect!(self, Call::DeleteSplitKey(key), Reply::Done => ())
    }

    fn new_datareader(&self) -> FdbResult<RawDataReader> {
        expect!(self, Call::NewDataReader, Reply::DataReader(r) => r)
    }

    fn retrieve(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        reader: RawDataReader,
    ) -> FdbResult<()> {
        let call = Call::Retrieve {
            fdb,
            request,
            reader,
        };
        expect!(self, call, Reply::Done => ())
    }

    fn datareader_open(&self, reader: RawDataReader) -> FdbResult<u64> {
        expect!(self, Call::DataReaderOpen(reader), Reply::Position(n) => n)
    }

    fn datareader_close(&self, reader: RawDataReader) -> FdbResult<()> {
        expect!(self, Call::DataReaderClose(reader), Reply::Done => ())
    }

    fn datareader_tell(&self, reader: RawDataReader) -> FdbResult<u64> {
        expect!(self, Call::DataReaderTell(reader), Reply::Position(n) => n)
    }

    fn datareader_seek(&self, reader: RawDataReader, position: u64) -> FdbResult<()> {
        let call = Call::DataReaderSeek { reader, position };
        expect!(self, call, Reply::Done => ())
    }

    fn datareader_skip(&self, reader: RawDataReader, count: u64) -> FdbResult<()> {
        let call = Call::DataReaderSkip { reader, count };
        expect!(self, call, Reply::Done => ())
    }

    fn datareader_read(&self, reader: RawDataReader, count: usize) -> FdbResult<Vec<u8>> {
        let mut data = Vec::new();
        while data.len() < count {
            let piece = (count - data.len()).min(READ_PIECE);
            let call = Call::DataReaderRead {
                reader,
                count: piece as u64,
            };
            let bytes = expect!(self, call, Reply::Bytes(b) => b)?;
            if bytes.is_empty() {
                break;
            }
            data.extend_from_slice(&bytes);
        }
        Ok(data)
    }

    fn delete_datareader(&self, reader: RawDataReader) -> FdbResult<()> {
        expect!(self, Call::DeleteDataReader(reader), Reply::Done => ())
    }

    fn wipe(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> FdbResult<RawWipeIterator> {
        let call = Call::Wipe {
            fdb,
            request,
            doit,
            porcelain,
            unsafe_wipe_all,
        };
        expect!(self, call, Reply::WipeIterator(it) => it)
    }

    fn wipe_iterator_next(&self, iterator: RawWipeIterator) -> FdbResult<Option<String>> {
        expect!(self, Call::WipeIteratorNext(iterator), Reply::Line(l) => l)
    }

    fn delete_wipe_iterator(&self, iterator: RawWipeIterator) -> FdbResult<()> {
        expect!(self, Call::DeleteWipeIterator(iterator), Reply::Done => ())
    }

    fn purge(
        &self,
        fdb: RawHandle,
        request: RawRequest,
        doit: bool,
        porcelain: bool,
    ) -> FdbResult<RawPurgeIterator> {
        let call = Call::Purge {
            fdb,
            request,
            doit,
            porcelain,
        };
        expect!(self, call, Reply::PurgeIterator(it) => it)
    }

    fn purge_iterator_next(&self, iterator: RawPurgeIterator) -> FdbResult<Option<String>> {
        expect!(self, Call::PurgeIteratorNext(iterator), Reply::Line(l) => l)
    }

    fn delete_purge_iterator(&self, iterator: RawPurgeIterator) -> FdbResult<()> {
        expect!(self, Call::DeletePurgeIterator(iterator), Reply::Done => ())
    }
}

/// Runs one call against `api`.
pub fn dispatch(api: &dyn NativeApi, call: Call) -> Reply {
    use Reply as R;
    match call {
        Call::Version => R::from_result(api.version(), R::Text),
        Call::VcsVersion => R::from_result(api.vcs_version(), R::Text),
        Call::NewHandle => R::from_result(api.new_handle(), R::Handle),
        Call::NewHandleFromYaml {
            config,
            user_config,
        } => R::from_result(api.new_handle_from_yaml(&config, &user_config), R::Handle),
        Call::DeleteHandle(fdb) => R::from_result(api.delete_handle(fdb), |()| R::Done),
        Call::Archive { fdb, key, data } => {
            R::from_result(api.archive(fdb, key, &data), |()| R::Done)
        }
        Call::ArchiveMultiple { fdb, request, data } => {
            R::from_result(api.archive_multiple(fdb, request, &data), |()| R::Done)
        }
        Call::Flush(fdb) => R::from_result(api.flush(fdb), |()| R::Done),
        Call::NewKey => R::from_result(api.new_key(), R::Key),
        Call::KeyAdd { key, param, value } => {
            R::from_result(api.key_add(key, &param, &value), |()| R::Done)
        }
        Call::DeleteKey(key) => R::from_result(api.delete_key(key), |()| R::Done),
        Call::NewRequest => R::from_result(api.new_request(), R::Request),
        Call::RequestAdd {
            request,
            param,
            values,
        } => R::from_result(api.request_add(request, &param, &values), |()| R::Done),
        Call::ExpandRequest(request) => {
            R::from_result(api.expand_request(request), |()| R::Done)
        }
        Call::DeleteRequest(request) => {
            R::from_result(api.delete_request(request), |()| R::Done)
        }
        Call::List {
            fdb,
            request,
            duplicates,
        } => R::from_result(api.list(fdb, request, duplicates), R::ListIterator),
        Call::ListIteratorNext(it) => R::from_result(api.listiterator_next(it), R::Step),
        Call::ListIteratorAttrs(it) => R::from_result(api.listiterator_attrs(it), R::Attrs),
        Call::ListIteratorSplitKey { iterator, key } => {
            R::from_result(api.listiterator_splitkey(iterator, key), |()| R::Done)
        }
        Call::DeleteListIterator(it) => {
            R::from_result(api.delete_listiterator(it), |()| R::Done)
        }
        Call::NewSplitKey => R::from_result(api.new_splitkey(), R::SplitKey),
        Call::SplitKeyNextMetadata(key) => {
            R::from_result(api.splitkey_next_metadata(key), R::Metadata)
        }
        Call::DeleteSplitKey(key) => R::from_result(api.delete_splitkey(key), |()| R::Done),
        Call::NewDataReader => R::from_result(api.new_datareader(), R::DataReader),
        Call::Retrieve {
            fdb,
            request,
            reader,
        } => R::from_result(api.retrieve(fdb, request, reader), |()| R::Done),
        Call::DataReaderOpen(reader) => R::from_result(api.datareader_open(reader), R::Position),
        Call::DataReaderClose(reader) => {
            R::from_result(api.datareader_close(reader), |()| R::Done)
        }
        Call::DataReaderTell(reader) => R::from_result(api.datareader_tell(reader), R::Position),
        Call::DataReaderSeek { reader, position } => {
            R::from_result(api.datareader_seek(reader, position), |()| R::Done)
        }
        Call::DataReaderSkip { reader, count } => {
            R::from_result(api.datareader_skip(reader, count), |()| R::Done)
        }
        Call::DataReaderRead { reader, count } => match usize::try_from(count) {
            Ok(count) => R::from_result(api.datareader_read(reader, count), R::Bytes),
            Err(_) => R::Failed(WireError::from(&FdbError::invalid_argument(
                "read count does not fit in memory",
            ))),
        },
        Call::DeleteDataReader(reader) => {
            R::from_result(api.delete_datareader(reader), |()| R::Done)
        }
        Call::Wipe {
            fdb,
            request,
            doit,
            porcelain,
            unsafe_wipe_all,
        } => R::from_result(
            api.wipe(fdb, request, doit, porcelain, unsafe_wipe_all),
            R::WipeIterator,
        ),
        Call::WipeIteratorNext(it) => R::from_result(api.wipe_iterator_next(it), R::Line),
        Call::DeleteWipeIterator(it) => {
            R::from_result(api.delete_wipe_iterator(it), |()| R::Done)
        }
        Call::Purge {
            fdb,
            request,
            doit,
            porcelain,
        } => R::from_result(api.purge(fdb, request, doit, porcelain), R::PurgeIterator),
        Call::PurgeIteratorNext(it) => R::from_result(api.purge_iterator_next(it), R::Line),
        Call::DeletePurgeIterator(it) => {
            R::from_result(api.delete_purge_iterator(it), |()| R::Done)
        }
    }
}

/// Answers calls read from `reader` until it ends.
///
/// A reply too large for one frame is answered with an error instead.
pub fn serve<R: Read, W: Write>(api: &dyn NativeApi, reader: &mut R, writer: &mut W) -> FdbResult<()> {
    let mut served = 0u64;
    while let Some(call) = read_frame::<_, Call>(reader)? {
        let name = call.name();
        let reply = dispatch(api, call);
        if let Reply::Failed(error) = &reply {
            debug!(call = name, error = %error, "call failed");
        }
        match write_frame(writer, &reply) {
            Err(e @ FdbError::Protocol { .. }) => {
                warn!(call = name, error = %e, "reply not sent");
                write_frame(writer, &Reply::Failed(WireError::from(&e)))?;
            }
            written => written?,
        }
        served += 1;
    }
    debug!(calls = served, "client disconnected");
    Ok(())
}

/// Answers every call with `error`, for a worker whose library failed to load.
pub fn serve_unavailable<R: Read, W: Write>(
    error: &FdbError,
    reader: &mut R,
    writer: &mut W,
) -> FdbResult<()> {
    let reply = Reply::Failed(WireError::from(error));
    while read_frame::<_, Call>(reader)?.is_some() {
        write_frame(writer, &reply)?;
    }
    Ok(())
}
