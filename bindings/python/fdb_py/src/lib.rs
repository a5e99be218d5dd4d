//! Python bindings for FDB.
//!
//! This crate provides the `pyfdb` module using PyO3.

use fdb_core::{
    DataReader, Fdb as CoreFdb, FdbError, FdbOptions, Key as CoreKey, KeyInput, LibraryRegistry,
    ListElement, ListIterator as CoreListIterator, ListOptions, NativeApi,
    PurgeIterator as CorePurgeIterator, PurgeOptions, Request as CoreRequest, RequestInput,
    RequestValue, Scalar, WipeIterator as CoreWipeIterator, WipeOptions,
};
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyNotImplementedError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::sync::GILOnceCell;
use pyo3::types::{PyBytes, PyDict, PyList, PyString, PyTuple};
use std::path::PathBuf;
use std::sync::Arc;

/// Library version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

create_exception!(pyfdb, FDBException, PyException, "Error raised by the FDB library.");

/// The session used by the module-level functions.
static DEFAULT_FDB: GILOnceCell<Py<Fdb>> = GILOnceCell::new();

fn py_err(err: FdbError) -> PyErr {
    match err {
        FdbError::UnsupportedSeekMode => PyNotImplementedError::new_err(err.to_string()),
        FdbError::ConflictingArguments { .. } | FdbError::InvalidArgument { .. } => {
            PyValueError::new_err(err.to_string())
        }
        other => FDBException::new_err(other.to_string()),
    }
}

fn default_api(lib: Option<PathBuf>) -> PyResult<Arc<dyn NativeApi>> {
    LibraryRegistry::global()
        .load(lib.as_deref())
        .map_err(py_err)
}

/// Configuration text: strings pass through, anything else goes through
/// `json.dumps`.
fn config_text(py: Python<'_>, config: &Bound<'_, PyAny>) -> PyResult<String> {
    if let Ok(text) = config.downcast::<PyString>() {
        return Ok(text.to_str()?.to_string());
    }
    PyModule::import(py, "json")?
        .call_method1("dumps", (config,))?
        .extract()
}

fn scalar(value: &Bound<'_, PyAny>) -> PyResult<Scalar> {
    if let Ok(text) = value.downcast::<PyString>() {
        return Ok(Scalar::Text(text.to_str()?.to_string()));
    }
    value.extract::<i64>().map(Scalar::Integer).map_err(|_| {
        PyTypeError::new_err(format!(
            "request values must be str or int, not {}",
            value.get_type()
        ))
    })
}

fn request_value(value: &Bound<'_, PyAny>) -> PyResult<RequestValue> {
    if let Ok(list) = value.downcast::<PyList>() {
        return list.iter().map(|v| scalar(&v)).collect::<PyResult<_>>().map(RequestValue::List);
    }
    if let Ok(tuple) = value.downcast::<PyTuple>() {
        return tuple.iter().map(|v| scalar(&v)).collect::<PyResult<_>>().map(RequestValue::List);
    }
    scalar(value).map(RequestValue::Single)
}

fn request_fields(mapping: &Bound<'_, PyDict>) -> PyResult<Vec<(String, RequestValue)>> {
    mapping
        .iter()
        .map(|(k, v)| Ok((k.extract::<String>()?, request_value(&v)?)))
        .collect()
}

fn key_fields(mapping: &Bound<'_, PyDict>) -> PyResult<Vec<(String, String)>> {
    mapping
        .iter()
        .map(|(k, v)| {
            let value = match scalar(&v)? {
                Scalar::Text(text) => text,
                Scalar::Integer(n) => n.to_string(),
            };
            Ok((k.extract::<String>()?, value))
        })
        .collect()
}

/// A request argument: a `Request`, a mapping, or request text.
enum RequestArg<'py> {
    Object(PyRef<'py, Request>),
    Fields(Vec<(String, RequestValue)>),
    Text(String),
}

impl<'py> RequestArg<'py> {
    fn extract(value: &Bound<'py, PyAny>) -> PyResult<Self> {
        if let Ok(request) = value.downcast::<Request>() {
            return Ok(Self::Object(request.borrow()));
        }
        if let Ok(mapping) = value.downcast::<PyDict>() {
            return request_fields(mapping).map(Self::Fields);
        }
        if let Ok(text) = value.downcast::<PyString>() {
            return Ok(Self::Text(text.to_str()?.to_string()));
        }
        Err(PyTypeError::new_err("request must be a Request, a dict or a str"))
    }

    fn input(&self) -> RequestInput<'_> {
        match self {
            Self::Object(request) => RequestInput::Request(&request.inner),
            Self::Fields(fields) => RequestInput::Fields(fields.clone()),
            Self::Text(text) => RequestInput::Text(text.clone()),
        }
    }
}

/// A key argument: a `Key` or a mapping.
enum KeyArg<'py> {
    Object(PyRef<'py, Key>),
    Fields(Vec<(String, String)>),
}

impl<'py> KeyArg<'py> {
    fn extract(value: &Bound<'py, PyAny>) -> PyResult<Self> {
        if let Ok(key) = value.downcast::<Key>() {
            return Ok(Self::Object(key.borrow()));
        }
        if let Ok(mapping) = value.downcast::<PyDict>() {
            return key_fields(mapping).map(Self::Fields);
        }
        Err(PyTypeError::new_err("key must be a Key or a dict"))
    }

    fn input(&self) -> KeyInput<'_> {
        match self {
            Self::Object(key) => KeyInput::Key(&key.inner),
            Self::Fields(fields) => KeyInput::Fields(fields.clone()),
        }
    }
}

/// An exact archival key.
#[pyclass]
pub struct Key {
    inner: CoreKey,
}

#[pymethods]
impl Key {
    /// Creates a key from a dict of field names to values.
    #[new]
    #[pyo3(signature = (keys=None, lib=None))]
    fn new(keys: Option<&Bound<'_, PyDict>>, lib: Option<PathBuf>) -> PyResult<Self> {
        let fields = keys.map(key_fields).transpose()?.unwrap_or_default();
        let inner = CoreKey::from_fields(default_api(lib)?, fields).map_err(py_err)?;
        Ok(Self { inner })
    }

    /// Adds a field.
    fn set(&mut self, param: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value = match scalar(value)? {
            Scalar::Text(text) => text,
            Scalar::Integer(n) => n.to_string(),
        };
        self.inner.set(param, &value).map_err(py_err)
    }

    fn __setitem__(&mut self, param: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        self.set(param, value)
    }

    fn __repr__(&self) -> String {
        let fields: Vec<String> = self
            .inner
            .fields()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("Key({})", fields.join(","))
    }
}

/// A request with possibly several values per field.
#[pyclass]
pub struct Request {
    inner: CoreRequest,
}

#[pymethods]
impl Request {
    /// Creates a request from a dict of field names to a value or list of values.
    #[new]
    #[pyo3(signature = (request=None, lib=None))]
    fn new(request: Option<&Bound<'_, PyDict>>, lib: Option<PathBuf>) -> PyResult<Self> {
        let fields = request.map(request_fields).transpose()?.unwrap_or_default();
        let inner = CoreRequest::from_fields(default_api(lib)?, fields).map_err(py_err)?;
        Ok(Self { inner })
    }

    /// Values set for `param`, or None.
    fn value(&self, param: &str) -> Option<Vec<String>> {
        self.inner.value(param).map(<[String]>::to_vec)
    }

    /// Resolves defaults and aliases in place.
    fn expand(&mut self) -> PyResult<()> {
        self.inner.expand().map_err(py_err)
    }

    fn __setitem__(&mut self, param: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value = request_value(value)?;
        self.inner.set(param, value).map_err(py_err)
    }

    fn __repr__(&self) -> String {
        format!("Request({})", self.inner)
    }
}

fn element_dict<'py>(py: Python<'py>, element: ListElement) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("path", element.path)?;
    dict.set_item("offset", element.offset)?;
    dict.set_item("length", element.length)?;
    if let Some(keys) = element.keys {
        dict.set_item("keys", keys)?;
    }
    if let Some(schema) = element.schema {
        dict.set_item("schema", schema)?;
    }
    Ok(dict)
}

/// Iterator over listed fields, yielding dicts.
#[pyclass]
pub struct ListIterator {
    inner: CoreListIterator,
}

#[pymethods]
impl ListIterator {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__<'py>(
        mut slf: PyRefMut<'py, Self>,
        py: Python<'py>,
    ) -> PyResult<Option<Bound<'py, PyDict>>> {
        match slf.inner.next() {
            Some(element) => element_dict(py, element.map_err(py_err)?).map(Some),
            None => Ok(None),
        }
    }
}

/// Iterator over wipe report lines.
#[pyclass]
pub struct WipeIterator {
    inner: CoreWipeIterator,
}

#[pymethods]
impl WipeIterator {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(mut slf: PyRefMut<'_, Self>) -> PyResult<Option<String>> {
        slf.inner.next().transpose().map_err(py_err)
    }
}

/// Iterator over purge report lines.
#[pyclass]
pub struct PurgeIterator {
    inner: CorePurgeIterator,
}

#[pymethods]
impl PurgeIterator {
    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(mut slf: PyRefMut<'_, Self>) -> PyResult<Option<String>> {
        slf.inner.next().transpose().map_err(py_err)
    }
}

/// A readable, seekable stream over retrieved data.
///
/// Opens on first use. Only absolute seeks are supported.
#[pyclass]
pub struct DataRetriever {
    inner: DataReader,
}

#[pymethods]
impl DataRetriever {
    /// Opens the stream. Opening twice does nothing.
    fn open(&mut self) -> PyResult<()> {
        self.inner.open().map(drop).map_err(py_err)
    }

    /// Closes the stream. Closing twice does nothing.
    fn close(&mut self) -> PyResult<()> {
        self.inner.close().map_err(py_err)
    }

    /// Reads up to `count` bytes, or everything remaining when negative.
    #[pyo3(signature = (count=-1))]
    fn read<'py>(&mut self, py: Python<'py>, count: i64) -> PyResult<Bound<'py, PyBytes>> {
        let count = usize::try_from(count).ok();
        let data = self.inner.read_chunk(count).map_err(py_err)?;
        Ok(PyBytes::new(py, &data))
    }

    /// Moves to an absolute position. Only `whence=0` is supported.
    #[pyo3(signature = (offset, whence=0))]
    fn seek(&mut self, offset: u64, whence: i32) -> PyResult<u64> {
        if whence != 0 {
            return Err(py_err(FdbError::UnsupportedSeekMode));
        }
        self.inner.seek_to(offset).map_err(py_err)?;
        Ok(offset)
    }

    /// Moves forward by `count` bytes.
    fn skip(&mut self, count: u64) -> PyResult<()> {
        self.inner.skip(count).map_err(py_err)
    }

    /// Current position.
    fn tell(&mut self) -> PyResult<u64> {
        self.inner.tell().map_err(py_err)
    }

    /// Total size in bytes.
    fn size(&mut self) -> PyResult<u64> {
        self.inner.size().map_err(py_err)
    }

    fn readable(&self) -> bool {
        true
    }

    fn seekable(&self) -> bool {
        true
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    #[pyo3(signature = (_exc_type=None, _exc_val=None, _exc_tb=None))]
    fn __exit__(
        &mut self,
        _exc_type: Option<PyObject>,
        _exc_val: Option<PyObject>,
        _exc_tb: Option<PyObject>,
    ) -> PyResult<bool> {
        self.close()?;
        Ok(false)
    }
}

/// An FDB session.
#[pyclass(name = "FDB")]
pub struct Fdb {
    inner: CoreFdb,
}

impl Fdb {
    fn create(
        py: Python<'_>,
        config: Option<&Bound<'_, PyAny>>,
        user_config: Option<&Bound<'_, PyAny>>,
        home: Option<PathBuf>,
        lib: Option<PathBuf>,
    ) -> PyResult<Self> {
        let mut options = FdbOptions::new();
        if let Some(config) = config {
            options = options.config(config_text(py, config)?);
        }
        if let Some(user_config) = user_config {
            options = options.user_config(config_text(py, user_config)?);
        }
        if let Some(home) = home {
            options = options.home(home);
        }
        let inner = CoreFdb::open(default_api(lib)?, &options).map_err(py_err)?;
        Ok(Self { inner })
    }
}

#[pymethods]
impl Fdb {
    /// Opens a session.
    ///
    /// Args:
    ///     config: System configuration, as a dict or YAML/JSON text.
    ///     user_config: User configuration, as a dict or YAML/JSON text.
    ///     home: FDB home directory to read configuration from. Cannot be
    ///         combined with `config`.
    ///     lib: Path to the FDB library.
    #[new]
    #[pyo3(signature = (config=None, user_config=None, home=None, lib=None))]
    fn new(
        py: Python<'_>,
        config: Option<&Bound<'_, PyAny>>,
        user_config: Option<&Bound<'_, PyAny>>,
        home: Option<PathBuf>,
        lib: Option<PathBuf>,
    ) -> PyResult<Self> {
        Self::create(py, config, user_config, home, lib)
    }

    /// Archives `data`, under an explicit `key` or checked against `request`.
    #[pyo3(signature = (data, request=None, key=None))]
    fn archive(
        &self,
        data: &[u8],
        request: Option<&Bound<'_, PyAny>>,
        key: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        if request.is_some() && key.is_some() {
            return Err(py_err(FdbError::conflicting_arguments(
                "specify at most one of request and key",
            )));
        }
        let request = request.map(RequestArg::extract).transpose()?;
        let key = key.map(KeyArg::extract).transpose()?;
        self.inner
            .archive(
                data,
                request.as_ref().map(RequestArg::input),
                key.as_ref().map(KeyArg::input),
            )
            .map_err(py_err)
    }

    /// Makes archived data durable.
    ///
    /// The GIL stays held: a session is used from one thread at a time.
    fn flush(&self) -> PyResult<()> {
        self.inner.flush().map_err(py_err)
    }

    /// Lists fields matching `request`, or everything.
    #[pyo3(signature = (request=None, duplicates=false, keys=false, schema=false))]
    fn list(
        &self,
        request: Option<&Bound<'_, PyAny>>,
        duplicates: bool,
        keys: bool,
        schema: bool,
    ) -> PyResult<ListIterator> {
        let request = request.map(RequestArg::extract).transpose()?;
        let options = ListOptions::default()
            .duplicates(duplicates)
            .keys(keys)
            .schema(schema);
        let inner = self
            .inner
            .list(request.as_ref().map(RequestArg::input), options)
            .map_err(py_err)?;
        Ok(ListIterator { inner })
    }

    /// Retrieves the data matching `request`.
    fn retrieve(&self, request: &Bound<'_, PyAny>) -> PyResult<DataRetriever> {
        let request = RequestArg::extract(request)?;
        let inner = self.inner.retrieve(request.input()).map_err(py_err)?;
        Ok(DataRetriever { inner })
    }

    /// Wipes data matching `request`. Reports only unless `doit`.
    #[pyo3(signature = (request, doit=false, porcelain=false, unsafe_wipe_all=false))]
    fn wipe(
        &self,
        request: &Bound<'_, PyAny>,
        doit: bool,
        porcelain: bool,
        unsafe_wipe_all: bool,
    ) -> PyResult<WipeIterator> {
        let request = RequestArg::extract(request)?;
        let options = WipeOptions::default()
            .doit(doit)
            .porcelain(porcelain)
            .unsafe_wipe_all(unsafe_wipe_all);
        let inner = self.inner.wipe(request.input(), options).map_err(py_err)?;
        Ok(WipeIterator { inner })
    }

    /// Purges superseded duplicates matching `request`. Reports only unless `doit`.
    #[pyo3(signature = (request, doit=false, porcelain=false))]
    fn purge(&self, request: &Bound<'_, PyAny>, doit: bool, porcelain: bool) -> PyResult<PurgeIterator> {
        let request = RequestArg::extract(request)?;
        let options = PurgeOptions::default().doit(doit).porcelain(porcelain);
        let inner = self.inner.purge(request.input(), options).map_err(py_err)?;
        Ok(PurgeIterator { inner })
    }

    fn __repr__(&self) -> String {
        format!("<FDB {}>", self.inner.api().library_path().display())
    }
}

fn default_fdb(py: Python<'_>) -> PyResult<&Py<Fdb>> {
    DEFAULT_FDB.get_or_try_init(py, || {
        Py::new(py, Fdb::create(py, None, None, None, None)?)
    })
}

/// Archives with the default session.
#[pyfunction]
#[pyo3(signature = (data, request=None, key=None))]
fn archive(
    py: Python<'_>,
    data: &[u8],
    request: Option<&Bound<'_, PyAny>>,
    key: Option<&Bound<'_, PyAny>>,
) -> PyResult<()> {
    default_fdb(py)?.borrow(py).archive(data, request, key)
}

/// Flushes the default session.
#[pyfunction]
fn flush(py: Python<'_>) -> PyResult<()> {
    default_fdb(py)?.borrow(py).flush()
}

/// Lists with the default session.
#[pyfunction]
#[pyo3(signature = (request=None, duplicates=false, keys=false, schema=false))]
fn list(
    py: Python<'_>,
    request: Option<&Bound<'_, PyAny>>,
    duplicates: bool,
    keys: bool,
    schema: bool,
) -> PyResult<ListIterator> {
    default_fdb(py)?
        .borrow(py)
        .list(request, duplicates, keys, schema)
}

/// Retrieves with the default session.
#[pyfunction]
fn retrieve(py: Python<'_>, request: &Bound<'_, PyAny>) -> PyResult<DataRetriever> {
    default_fdb(py)?.borrow(py).retrieve(request)
}

/// Returns the bindings version.
#[pyfunction]
fn version() -> &'static str {
    VERSION
}

/// Python module initialization.
#[pymodule]
fn pyfdb(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("FDBException", m.py().get_type::<FDBException>())?;
    m.add_class::<Fdb>()?;
    m.add_class::<Key>()?;
    m.add_class::<Request>()?;
    m.add_class::<ListIterator>()?;
    m.add_class::<WipeIterator>()?;
    m.add_class::<PurgeIterator>()?;
    m.add_class::<DataRetriever>()?;
    m.add_function(wrap_pyfunction!(archive, m)?)?;
    m.add_function(wrap_pyfunction!(flush, m)?)?;
    m.add_function(wrap_pyfunction!(list, m)?)?;
    m.add_function(wrap_pyfunction!(retrieve, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;
    Ok(())
}
