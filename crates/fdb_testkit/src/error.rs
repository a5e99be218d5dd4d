//! Status codes and last-error tracking for the mock C API.

use crate::store::StoreError;
use fdb_sys::{FDB_ERROR_GENERAL_EXCEPTION, FDB_ERROR_UNKNOWN_EXCEPTION, FDB_SUCCESS};
use std::cell::RefCell;
use std::ffi::{c_char, c_int, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors raised inside the mock library.
#[derive(Debug, Error)]
pub enum MockError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A required pointer argument was null.
    #[error("null pointer argument: {0}")]
    NullPointer(&'static str),

    /// A string argument was not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// An object was used in a state that does not allow the call.
    #[error("{0}")]
    State(String),
}

impl MockError {
    /// Creates a state error.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }
}

/// Result type for mock API bodies.
pub type MockResult<T> = Result<T, MockError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Sets the last error message.
pub fn set_last_error(message: impl Into<String>) {
    let msg = message.into().replace('\0', " ");
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the last error.
pub fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// The last error message, or null.
///
/// The pointer is valid until the next mock call on this thread.
pub fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(cstr) => cstr.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Runs the body of an API function, turning errors and panics into status
/// codes and the last error message.
pub fn guard<F>(body: F) -> c_int
where
    F: FnOnce() -> MockResult<c_int>,
{
    clear_last_error();
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            set_last_error(e.to_string());
            FDB_ERROR_GENERAL_EXCEPTION
        }
        Err(_) => {
            set_last_error("unexpected panic in mock FDB library");
            FDB_ERROR_UNKNOWN_EXCEPTION
        }
    }
}

/// Shorthand for a successful body.
pub fn ok() -> MockResult<c_int> {
    Ok(FDB_SUCCESS)
}
