//! # fdb_core
//!
//! Safe bindings to the FDB field database client library (`libfdb5`).
//!
//! The library is loaded at runtime. Every native object it hands out is
//! owned by exactly one Rust value and released when that value is dropped.
//!
//! ## Layers
//!
//! - [`NativeApi`] - one typed call per C entry point, with status codes
//!   already turned into [`FdbError`]s
//! - [`NativeLibrary`] - the library loaded into this process
//! - [`WorkerProxy`] - the same calls served by an `fdb-worker` process
//! - [`LibraryRegistry`] - decides which of the two backs a library path
//! - [`Fdb`], [`Key`], [`Request`], [`ListIterator`], [`WipeIterator`],
//!   [`PurgeIterator`], [`DataReader`] - owners of native objects
//!
//! ## Example
//!
//! ```rust,no_run
//! use fdb_core::{Fdb, FdbConfig, FdbOptions, LibraryRegistry, ListOptions};
//! use std::io::Read;
//!
//! # fn main() -> fdb_core::FdbResult<()> {
//! let api = LibraryRegistry::global().load(None)?;
//! let options = FdbOptions::new().config(FdbConfig::local("/data/fdb"));
//! let fdb = Fdb::open(api, &options)?;
//!
//! for element in fdb.list(Some("class=rd,expver=xxxx".into()), ListOptions::default())? {
//!     let element = element?;
//!     println!("{} {} {}", element.path, element.offset, element.length);
//! }
//!
//! let mut reader = fdb.retrieve("class=rd,expver=xxxx,param=138")?;
//! let mut data = Vec::new();
//! reader.read_to_end(&mut data)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod api;
mod config;
mod error;
mod handle;
mod key;
mod library;
mod list;
mod proxy;
mod raw;
mod reader;
mod registry;
mod request;
mod version;
mod wipe;
pub mod wire;

#[cfg(test)]
mod testing;

pub use api::NativeApi;
pub use config::{
    ConfigSource, FdbConfig, FdbOptions, HandleConfig, Root, Space, HOME_CONFIG_PATH,
    HOME_USER_CONFIG_PATH,
};
pub use error::{FdbError, FdbResult};
pub use handle::Fdb;
pub use key::{Key, KeyInput};
pub use library::{locate, search_paths, search_paths_with, NativeLibrary, PREFIX_VARIABLES};
pub use list::{LevelFields, ListElement, ListIterator, ListOptions};
pub use proxy::{
    dispatch, serve, serve_unavailable, worker_program, WorkerProxy, WORKER_PROGRAM,
    WORKER_PROGRAM_VARIABLE,
};
pub use raw::{
    ListAttrs, MetadataField, RawDataReader, RawHandle, RawKey, RawListIterator,
    RawPurgeIterator, RawRequest, RawSplitKey, RawWipeIterator, Step,
};
pub use reader::{DataReader, READ_PIECE};
pub use registry::{LibraryRegistry, WorkerFactory};
pub use request::{parse_request_str, Request, RequestInput, RequestValue, Scalar, VERB};
pub use version::{compare_versions, is_compatible, MIN_FDB_VERSION};
pub use wipe::{PurgeIterator, PurgeOptions, WipeIterator, WipeOptions};
