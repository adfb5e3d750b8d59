//! Purpose: Define the public Rust API boundary for tablekv.
//! Exports: The `Store` facade plus the value, option, and error types it speaks.
//! Role: Public, additive-only surface used by the CLI and integration tests.
//! Invariants: Callers never name an engine adapter directly; `Store::open` picks one.

mod store;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::backend::{Row, TableRows};
pub use crate::core::codec::{DEFAULT_DELIMITER, Delimiter};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::options::{StorageKind, StoreOptions};
pub use crate::core::predicate::{Operator, decode_be, encode_be};
pub use store::{ApiResult, Store};
