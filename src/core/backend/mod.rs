//! Purpose: Table-service contract shared by the flat and hierarchical adapters.
//! Exports: `TableBackend`, `Row`, `TableRows`, `open_backend`, both adapters.
//! Role: The facade holds exactly one `Box<dyn TableBackend>`; callers never branch on kind.
//! Invariants: Reads never fail; absence is an empty map, `None` or `false`.
//! Invariants: Each mutation runs in one engine transaction and is all-or-nothing.
//! Invariants: Identifiers are validated before any engine call.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::core::codec::Delimiter;
use crate::core::error::{Error, ErrorKind};
use crate::core::options::{StorageKind, StoreOptions};

#[cfg(test)]
pub(crate) mod failpoint;
pub mod flat;
pub mod nested;

pub use flat::FlatBackend;
pub use nested::NestedBackend;

/// Fields of one record, ordered by field name.
pub type Row = BTreeMap<String, Vec<u8>>;

/// Records of one table, ordered by id.
pub type TableRows = BTreeMap<String, Row>;

pub type RecordVisitor<'a> = dyn FnMut(&str, &Row) -> ControlFlow<()> + 'a;

pub trait TableBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    fn delimiter(&self) -> Delimiter;

    /// Whether values written with a TTL expire on this engine.
    fn supports_expiry(&self) -> bool;

    fn close(self: Box<Self>) -> Result<(), Error>;

    fn set_key(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error>;

    fn read_key(&self, key: &str) -> Option<Vec<u8>>;

    fn delete_key(&self, key: &str) -> Result<(), Error>;

    fn set_table(&self, table: &str, rows: &TableRows, ttl: Option<Duration>)
    -> Result<(), Error>;

    fn set_row(&self, table: &str, id: &str, row: &Row, ttl: Option<Duration>)
    -> Result<(), Error>;

    fn set_value(
        &self,
        table: &str,
        id: &str,
        field: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), Error>;

    fn exists_table(&self, table: &str) -> bool;

    fn exists_record(&self, table: &str, id: &str) -> bool;

    fn read_table(&self, table: &str) -> TableRows {
        let mut rows = TableRows::new();
        self.visit_records(table, &mut |id, row| {
            rows.insert(id.to_string(), row.clone());
            ControlFlow::Continue(())
        });
        rows
    }

    fn read_row(&self, table: &str, id: &str) -> Row;

    fn read_value(&self, table: &str, id: &str, field: &str) -> Option<Vec<u8>>;

    fn value_equals(&self, table: &str, id: &str, field: &str, probe: &[u8]) -> bool {
        self.read_value(table, id, field)
            .is_some_and(|value| value == probe)
    }

    fn delete_table(&self, table: &str) -> Result<(), Error>;

    fn delete_record(&self, table: &str, id: &str) -> Result<(), Error>;

    /// Walk every record of `table` in the engine's iteration order.
    fn visit_records(&self, table: &str, visit: &mut RecordVisitor<'_>);
}

pub fn open_backend(options: &StoreOptions) -> Result<Box<dyn TableBackend>, Error> {
    if options.password.is_some() {
        return Err(Error::new(ErrorKind::UnsupportedOperation)
            .with_message("encryption at rest is not available on either storage engine")
            .with_hint("Open the store without a password."));
    }
    match options.kind {
        StorageKind::Flat => Ok(Box::new(FlatBackend::open(options)?)),
        StorageKind::Hierarchical => Ok(Box::new(NestedBackend::open(options)?)),
    }
}

pub(crate) fn ensure_expiry(
    kind: StorageKind,
    supported: bool,
    ttl: Option<Duration>,
) -> Result<(), Error> {
    if ttl.is_some() && !supported {
        return Err(Error::new(ErrorKind::UnsupportedOperation)
            .with_message(format!("{kind} storage does not support value expiry"))
            .with_hint("Drop the TTL, or open the store with the flat engine."));
    }
    Ok(())
}
