//! # fdb_sys
//!
//! Raw C ABI of the FDB client library (`libfdb5`).
//!
//! This crate provides:
//! - Opaque handle types matching the C declarations
//! - Status code constants
//! - The [`Symbols`] table: every entry point the bindings consume, resolved
//!   at runtime from a [`libloading::Library`]
//!
//! Nothing here is safe to call directly. The `fdb_core` crate wraps each
//! symbol with error translation and ownership tracking.

#![allow(non_camel_case_types)]

mod symbols;
mod types;

pub use symbols::{SymbolError, Symbols};
pub use types::*;

/// Base name of the shared library, without platform prefix or suffix.
pub const LIBRARY_NAME: &str = "fdb5";

/// Returns the platform-specific file name of the shared library
/// (`libfdb5.so`, `libfdb5.dylib` or `fdb5.dll`).
pub fn library_filename() -> std::ffi::OsString {
    libloading::library_filename(LIBRARY_NAME)
}
