//! Which library backs which path.

use crate::api::NativeApi;
use crate::error::FdbResult;
use crate::library::{locate, NativeLibrary};
use crate::proxy::{worker_program, WorkerProxy};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Creates the backend for a library that cannot be loaded in-process.
pub type WorkerFactory = Arc<dyn Fn(&Path) -> FdbResult<Arc<dyn NativeApi>> + Send + Sync>;

static GLOBAL: Lazy<LibraryRegistry> = Lazy::new(LibraryRegistry::new);

#[derive(Default)]
struct Backends {
    primary: Option<(PathBuf, Arc<dyn NativeApi>)>,
    others: HashMap<PathBuf, Arc<dyn NativeApi>>,
}

/// Maps library paths to loaded backends.
///
/// Only one library can be initialised per process. The first library
/// loaded through a registry lives in-process; loading the same path again
/// shares it, and any other path is served by a worker process.
pub struct LibraryRegistry {
    backends: Mutex<Backends>,
    worker_factory: WorkerFactory,
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryRegistry {
    /// A registry that spawns `fdb-worker` processes for extra libraries.
    pub fn new() -> Self {
        Self::with_worker_factory(|path: &Path| {
            let proxy = WorkerProxy::spawn(&worker_program(), path)?;
            Ok(Arc::new(proxy) as Arc<dyn NativeApi>)
        })
    }

    /// A registry with a custom backend factory for extra libraries.
    pub fn with_worker_factory<F>(factory: F) -> Self
    where
        F: Fn(&Path) -> FdbResult<Arc<dyn NativeApi>> + Send + Sync + 'static,
    {
        Self {
            backends: Mutex::new(Backends::default()),
            worker_factory: Arc::new(factory),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static LibraryRegistry {
        &GLOBAL
    }

    /// Returns the backend for the library at `hint`, or the default one.
    ///
    /// Without a hint, an already loaded in-process library is reused.
    pub fn load(&self, hint: Option<&Path>) -> FdbResult<Arc<dyn NativeApi>> {
        let mut backends = self.backends.lock();

        let Some(hint) = hint else {
            if let Some((_, api)) = &backends.primary {
                return Ok(Arc::clone(api));
            }
            let library = NativeLibrary::load(None)?;
            let path = canonical(library.path());
            let api: Arc<dyn NativeApi> = Arc::new(library);
            backends.primary = Some((path, Arc::clone(&api)));
            return Ok(api);
        };

        let path = canonical(&locate(Some(hint))?);
        if let Some(api) = backends.find(&path) {
            return Ok(api);
        }

        let api: Arc<dyn NativeApi> = if backends.primary.is_none() {
            let api: Arc<dyn NativeApi> = Arc::new(NativeLibrary::load(Some(&path))?);
            backends.primary = Some((path.clone(), Arc::clone(&api)));
            api
        } else {
            debug!(path = %path.display(), "library already initialised, using a worker");
            let api = (self.worker_factory)(&path)?;
            backends.others.insert(path.clone(), Arc::clone(&api));
            api
        };
        Ok(api)
    }

    /// Adds an already initialised backend under its library path.
    ///
    /// The first backend added becomes the default one.
    pub fn register(&self, api: Arc<dyn NativeApi>) {
        let path = canonical(api.library_path());
        let mut backends = self.backends.lock();
        if backends.primary.is_none() {
            backends.primary = Some((path, api));
        } else {
            backends.others.insert(path, api);
        }
    }

    /// The in-process backend, if one has been loaded.
    pub fn primary(&self) -> Option<Arc<dyn NativeApi>> {
        self.backends
            .lock()
            .primary
            .as_ref()
            .map(|(_, api)| Arc::clone(api))
    }
}

impl Backends {
    fn find(&self, path: &Path) -> Option<Arc<dyn NativeApi>> {
        match &self.primary {
            Some((primary, api)) if primary == path => Some(Arc::clone(api)),
            _ => self.others.get(path).cloned(),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FdbError;
    use crate::testing::FakeApi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn library_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn default_load_reuses_primary() {
        let registry = LibraryRegistry::with_worker_factory(|_: &Path| {
            Err(FdbError::worker("no workers in this test"))
        });
        let fake: Arc<dyn NativeApi> = Arc::new(FakeApi::default());
        registry.register(Arc::clone(&fake));
        let loaded = registry.load(None).unwrap();
        assert!(Arc::ptr_eq(&loaded, &fake));
    }

    #[test]
    fn other_paths_go_to_workers_once() {
        let dir = tempfile::tempdir().unwrap();
        let other = library_file(dir.path(), "libfdb5-other.so");
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&spawned);
        let registry = LibraryRegistry::with_worker_factory(move |_: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeApi::default()) as Arc<dyn NativeApi>)
        });
        registry.register(Arc::new(FakeApi::default()));

        let first = registry.load(Some(&other)).unwrap();
        let second = registry.load(Some(&other)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&first, &registry.primary().unwrap()));
    }

    #[test]
    fn missing_explicit_library_is_not_found() {
        let registry = LibraryRegistry::new();
        let err = registry
            .load(Some(Path::new("/nonexistent/libfdb5.so")))
            .unwrap_err();
        assert!(matches!(err, FdbError::LibraryNotFound { .. }));
        assert!(registry.primary().is_none());
    }
}
