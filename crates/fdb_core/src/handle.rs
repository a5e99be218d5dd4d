//! The database session.

use crate::api::NativeApi;
use crate::config::{FdbOptions, HandleConfig};
use crate::error::{FdbError, FdbResult};
use crate::key::KeyInput;
use crate::list::{ListIterator, ListOptions};
use crate::raw::RawHandle;
use crate::reader::DataReader;
use crate::request::RequestInput;
use crate::wipe::{PurgeIterator, PurgeOptions, WipeIterator, WipeOptions};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// An open FDB session.
///
/// Sessions are `Send` and `Sync`, but the native library does not
/// serialise calls on one handle. A session shared between threads must be
/// synchronised by the caller, for example behind a `Mutex`; the same holds
/// for everything derived from it.
pub struct Fdb {
    api: Arc<dyn NativeApi>,
    raw: RawHandle,
}

impl Fdb {
    /// Opens a session configured by `options`.
    pub fn open(api: Arc<dyn NativeApi>, options: &FdbOptions) -> FdbResult<Self> {
        let raw = match options.resolve()? {
            HandleConfig::Defaults => api.new_handle()?,
            HandleConfig::Yaml {
                config,
                user_config,
            } => api.new_handle_from_yaml(&config, &user_config)?,
        };
        debug!(library = %api.library_path().display(), "opened FDB session");
        Ok(Self { api, raw })
    }

    /// Opens a session using the library's own configuration discovery.
    pub fn with_defaults(api: Arc<dyn NativeApi>) -> FdbResult<Self> {
        Self::open(api, &FdbOptions::default())
    }

    /// Archives `data`.
    ///
    /// - with a `key`, the data is stored under exactly that key;
    /// - with a `request`, the data's own metadata is checked against it;
    /// - with neither, the key is taken from the data's own metadata.
    ///
    /// Giving both is an error raised before the library is called.
    pub fn archive<'a>(
        &self,
        data: &[u8],
        request: Option<RequestInput<'a>>,
        key: Option<KeyInput<'a>>,
    ) -> FdbResult<()> {
        match (request, key) {
            (Some(_), Some(_)) => Err(FdbError::conflicting_arguments(
                "specify at most one of request and key",
            )),
            (None, Some(key)) => {
                let key = key.resolve(&self.api)?;
                self.api.archive(self.raw, key.raw(), data)
            }
            (Some(request), None) => {
                let request = request.resolve(&self.api, false)?;
                self.api
                    .archive_multiple(self.raw, Some(request.raw()), data)
            }
            (None, None) => self.api.archive_multiple(self.raw, None, data),
        }
    }

    /// Archives `data` under exactly `key`.
    pub fn archive_key<'a>(&self, data: &[u8], key: impl Into<KeyInput<'a>>) -> FdbResult<()> {
        self.archive(data, None, Some(key.into()))
    }

    /// Archives self-describing `data`, checking it against `request`.
    pub fn archive_request<'a>(
        &self,
        data: &[u8],
        request: impl Into<RequestInput<'a>>,
    ) -> FdbResult<()> {
        self.archive(data, Some(request.into()), None)
    }

    /// Makes everything archived so far durable. Blocks until done.
    pub fn flush(&self) -> FdbResult<()> {
        self.api.flush(self.raw)
    }

    /// Lists fields matching `request`, or every field when `None`.
    pub fn list<'a>(
        &self,
        request: Option<RequestInput<'a>>,
        options: ListOptions,
    ) -> FdbResult<ListIterator> {
        let raw = match request {
            Some(request) => {
                let request = request.resolve(&self.api, options.expand)?;
                self.api
                    .list(self.raw, Some(request.raw()), options.duplicates)?
            }
            None => self.api.list(self.raw, None, options.duplicates)?,
        };
        Ok(ListIterator::new(Arc::clone(&self.api), raw, options))
    }

    /// Retrieves the data matching `request`, expanding it first.
    pub fn retrieve<'a>(&self, request: impl Into<RequestInput<'a>>) -> FdbResult<DataReader> {
        self.retrieve_with(request, true)
    }

    /// Retrieves the data matching `request`.
    pub fn retrieve_with<'a>(
        &self,
        request: impl Into<RequestInput<'a>>,
        expand: bool,
    ) -> FdbResult<DataReader> {
        let request = request.into().resolve(&self.api, expand)?;
        DataReader::new(Arc::clone(&self.api), self.raw, &request)
    }

    /// Wipes the databases matching `request`.
    pub fn wipe<'a>(
        &self,
        request: impl Into<RequestInput<'a>>,
        options: WipeOptions,
    ) -> FdbResult<WipeIterator> {
        let request = request.into().resolve(&self.api, false)?;
        let raw = self.api.wipe(
            self.raw,
            request.raw(),
            options.doit,
            options.porcelain,
            options.unsafe_wipe_all,
        )?;
        debug!(doit = options.doit, "started wipe");
        Ok(WipeIterator::new(Arc::clone(&self.api), raw))
    }

    /// Purges superseded fields matching `request`.
    pub fn purge<'a>(
        &self,
        request: impl Into<RequestInput<'a>>,
        options: PurgeOptions,
    ) -> FdbResult<PurgeIterator> {
        let request = request.into().resolve(&self.api, false)?;
        let raw = self
            .api
            .purge(self.raw, request.raw(), options.doit, options.porcelain)?;
        debug!(doit = options.doit, "started purge");
        Ok(PurgeIterator::new(Arc::clone(&self.api), raw))
    }

    /// The library this session belongs to.
    pub fn api(&self) -> &Arc<dyn NativeApi> {
        &self.api
    }

    /// Native session handle.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl fmt::Debug for Fdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fdb")
            .field("library", &self.api.library_path())
            .field("handle", &self.raw)
            .finish()
    }
}

impl Drop for Fdb {
    fn drop(&mut self) {
        if let Err(e) = self.api.delete_handle(self.raw) {
            warn!(error = %e, "failed to release FDB handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FdbConfig;
    use crate::testing::FakeApi;

    fn open(fake: &Arc<FakeApi>) -> Fdb {
        let api: Arc<dyn NativeApi> = fake.clone();
        Fdb::with_defaults(api).unwrap()
    }

    #[test]
    fn sessions_can_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fdb>();

        let fake = Arc::new(FakeApi::default());
        let fdb = std::sync::Mutex::new(open(&fake));
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| fdb.lock().unwrap().flush().unwrap());
            }
        });
        let flushes = fake.calls().iter().filter(|c| c.starts_with("flush")).count();
        assert_eq!(flushes, 2);
    }

    #[test]
    fn defaults_use_plain_constructor() {
        let fake = Arc::new(FakeApi::default());
        drop(open(&fake));
        assert_eq!(fake.calls(), vec!["new_handle", "delete_handle"]);
    }

    #[test]
    fn config_goes_through_yaml_constructor() {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        let options = FdbOptions::new().config(FdbConfig::local("/r"));
        let _fdb = Fdb::open(api, &options).unwrap();
        let first = &fake.calls()[0];
        assert!(first.starts_with("new_handle_from_yaml {"));
        assert!(first.ends_with('|'));
    }

    #[test]
    fn conflicting_configuration_makes_no_native_call() {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn NativeApi> = fake.clone();
        let options = FdbOptions::new().home("/h").config("x: 1");
        assert!(matches!(
            Fdb::open(api, &options),
            Err(FdbError::ConfigurationConflict)
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn archive_with_request_and_key_is_rejected_first() {
        let fake = Arc::new(FakeApi::default());
        let fdb = open(&fake);
        let before = fake.calls().len();
        let err = fdb
            .archive(
                b"data",
                Some(RequestInput::from([("class", "rd")])),
                Some(KeyInput::from([("class", "rd")])),
            )
            .unwrap_err();
        assert!(matches!(err, FdbError::ConflictingArguments { .. }));
        assert_eq!(fake.calls().len(), before);
    }

    #[test]
    fn archive_dispatch() {
        let fake = Arc::new(FakeApi::default());
        let fdb = open(&fake);
        fdb.archive(b"abc", None, None).unwrap();
        fdb.archive_key(b"abcd", [("class", "rd")]).unwrap();
        fdb.archive_request(b"ab", "class=rd").unwrap();
        let calls = fake.calls();
        assert!(calls.contains(&"archive_multiple none 3".to_string()));
        assert!(calls.contains(&"archive 4".to_string()));
        assert!(calls.contains(&"archive_multiple request 2".to_string()));
        assert!(!calls.contains(&"expand_request".to_string()));
    }

    #[test]
    fn list_expands_by_default() {
        let fake = Arc::new(FakeApi::default());
        let fdb = open(&fake);
        let it = fdb
            .list(Some("class=rd".into()), ListOptions::default().duplicates(true))
            .unwrap();
        drop(it);
        let calls = fake.calls();
        let expand = calls.iter().position(|c| c == "expand_request").unwrap();
        let list = calls.iter().position(|c| c == "list request true").unwrap();
        assert!(expand < list);

        fdb.list(None, ListOptions::default()).unwrap();
        assert!(fake.calls().contains(&"list none false".to_string()));
    }

    #[test]
    fn wipe_passes_flags() {
        let fake = Arc::new(FakeApi::default());
        let fdb = open(&fake);
        let lines: Vec<_> = fdb
            .wipe("class=rd", WipeOptions::default().doit(true).porcelain(true))
            .unwrap()
            .collect();
        assert!(lines.is_empty());
        assert!(fake.calls().contains(&"wipe true true false".to_string()));
    }
}
