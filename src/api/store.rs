//! Purpose: The `Store` facade: one opened engine behind the table-service contract.
//! Exports: `Store`, `ApiResult`.
//! Role: Stable boundary for callers; selects the engine once at open time.
//! Invariants: The store exclusively owns its engine handle; `close` consumes it.
//! Invariants: Every call runs in its own engine transaction; nothing spans calls.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::time::Duration;

use crate::core::backend::{Row, TableBackend, TableRows, open_backend};
use crate::core::codec::Delimiter;
use crate::core::error::Error;
use crate::core::options::{StorageKind, StoreOptions};
use crate::core::scan;

pub type ApiResult<T> = Result<T, Error>;

pub struct Store {
    backend: Box<dyn TableBackend>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.backend.kind())
            .field("delimiter", &self.backend.delimiter())
            .finish()
    }
}

impl Store {
    pub fn open(options: StoreOptions) -> ApiResult<Self> {
        let backend = open_backend(&options)?;
        Ok(Self { backend })
    }

    pub fn close(self) -> ApiResult<()> {
        self.backend.close()
    }

    pub fn kind(&self) -> StorageKind {
        self.backend.kind()
    }

    pub fn delimiter(&self) -> Delimiter {
        self.backend.delimiter()
    }

    pub fn supports_expiry(&self) -> bool {
        self.backend.supports_expiry()
    }

    pub fn set_key(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> ApiResult<()> {
        self.backend.set_key(key, value, ttl)
    }

    pub fn read_key(&self, key: &str) -> Option<Vec<u8>> {
        self.backend.read_key(key)
    }

    pub fn delete_key(&self, key: &str) -> ApiResult<()> {
        self.backend.delete_key(key)
    }

    /// Writes every field of every record in one transaction.
    pub fn set_table(&self, table: &str, rows: &TableRows, ttl: Option<Duration>) -> ApiResult<()> {
        self.backend.set_table(table, rows, ttl)
    }

    pub fn set_row(&self, table: &str, id: &str, row: &Row, ttl: Option<Duration>) -> ApiResult<()> {
        self.backend.set_row(table, id, row, ttl)
    }

    pub fn set_value(
        &self,
        table: &str,
        id: &str,
        field: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> ApiResult<()> {
        self.backend.set_value(table, id, field, value, ttl)
    }

    pub fn exists_table(&self, table: &str) -> bool {
        self.backend.exists_table(table)
    }

    pub fn exists_record(&self, table: &str, id: &str) -> bool {
        self.backend.exists_record(table, id)
    }

    pub fn read_table(&self, table: &str) -> TableRows {
        self.backend.read_table(table)
    }

    pub fn read_row(&self, table: &str, id: &str) -> Row {
        self.backend.read_row(table, id)
    }

    pub fn read_value(&self, table: &str, id: &str, field: &str) -> Option<Vec<u8>> {
        self.backend.read_value(table, id, field)
    }

    pub fn value_equals(&self, table: &str, id: &str, field: &str, probe: &[u8]) -> bool {
        self.backend.value_equals(table, id, field, probe)
    }

    pub fn delete_table(&self, table: &str) -> ApiResult<()> {
        self.backend.delete_table(table)
    }

    pub fn delete_record(&self, table: &str, id: &str) -> ApiResult<()> {
        self.backend.delete_record(table, id)
    }

    /// Ids of records whose `field` satisfies `threshold <operator> value`.
    pub fn scan_table(
        &self,
        table: &str,
        field: &str,
        operator: &str,
        threshold: i64,
    ) -> ApiResult<Vec<String>> {
        scan::scan_table(self.backend.as_ref(), table, field, operator, threshold)
    }
}
