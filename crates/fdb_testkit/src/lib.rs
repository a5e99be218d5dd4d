//! # fdb_testkit
//!
//! Test utilities for the FDB bindings.
//!
//! This crate provides:
//! - An in-process implementation of the `libfdb5` C API over a small
//!   on-disk store, usable without a real FDB installation
//! - The same implementation as a `cdylib`, loadable by path like the real
//!   library (and therefore by `fdb-worker`)
//! - Session fixtures over temporary roots
//! - The canonical field population used by archive, list and wipe tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fdb_testkit::prelude::*;
//!
//! #[test]
//! fn lists_what_was_archived() {
//!     let test = TestFdb::new();
//!     populate(&test).unwrap();
//!     assert_eq!(count(&test, None).unwrap(), 4);
//! }
//! ```

#![warn(missing_docs)]

pub mod abi;
pub mod error;
pub mod fixtures;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::store::{encode_message, MOCK_ROOT_VARIABLE};
}

pub use abi::MOCK_VERSION;
pub use error::{MockError, MockResult};
pub use fixtures::*;
pub use store::{Store, StoreError, StoreResult};
