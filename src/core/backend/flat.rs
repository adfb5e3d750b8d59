//! Purpose: Table service over a single ordered key space (redb).
//! Exports: `FlatBackend`.
//! Role: Emulates tables and records with delimiter-joined key prefixes.
//! Invariants: Existence checks are prefix scans that stop at the first live key; an
//! absent table costs a seek, a present one costs one entry. No secondary index exists.
//! Invariants: Deletes walk every key under the prefix inside one write transaction.
//! Invariants: Every stored value carries an expiry envelope; expired values read as absent.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bstr::ByteSlice;
use redb::backends::InMemoryBackend;
use redb::{Database, DatabaseError, ReadOnlyTable, ReadableTable, Table, TableDefinition};
use tracing::{debug, warn};

use super::{RecordVisitor, Row, TableBackend, TableRows};
use crate::core::codec::{self, Delimiter, FlatKeys, Segment};
use crate::core::error::{Error, ErrorKind};
use crate::core::expiry::{self, Stored};
use crate::core::options::{StorageKind, StoreOptions};

const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

type KvTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;
type KvReadTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

pub struct FlatBackend {
    db: Database,
    keys: FlatKeys,
    location: Option<PathBuf>,
}

impl FlatBackend {
    pub fn open(options: &StoreOptions) -> Result<Self, Error> {
        let db = if options.in_memory {
            Database::builder().create_with_backend(InMemoryBackend::new())
        } else {
            Database::create(options.path())
        }
        .map_err(|err| open_error(options.path(), err))?;

        let backend = Self {
            db,
            keys: FlatKeys::new(options.delimiter),
            location: (!options.in_memory).then(|| options.path.clone()),
        };
        // Create the key table up front so read transactions always find it.
        backend.write(|_| Ok(())).map_err(|err| {
            Error::new(ErrorKind::OpenFailed)
                .with_message("failed to initialise flat store")
                .with_path(options.path())
                .with_source(err)
        })?;

        debug!(
            path = %options.path().display(),
            in_memory = options.in_memory,
            "opened flat store"
        );
        Ok(backend)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, redb::Error> {
        let now = expiry::now_millis();
        self.read(|table| {
            let Some(stored) = table.get(key)? else {
                return Ok(None);
            };
            Ok(live_payload(key, stored.value(), now).map(<[u8]>::to_vec))
        })
    }

    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        self.batch_set(&[(key.to_vec(), value)], ttl)
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.write(|table| {
            table
                .remove(key)
                .map_err(|err| Error::transaction("failed to delete key", err))?;
            Ok(())
        })
    }

    /// Writes every entry in one transaction; any failure discards all of them.
    pub fn batch_set(&self, writes: &[(Vec<u8>, &[u8])], ttl: Option<Duration>) -> Result<(), Error> {
        if writes.is_empty() {
            return Ok(());
        }
        let now = expiry::now_millis();
        self.write(|table| {
            for (key, value) in writes {
                put(table, key, &expiry::wrap(value, ttl, now))?;
            }
            Ok(())
        })
    }

    /// Visits live entries under `prefix` in key order until the visitor breaks.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        visit: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), redb::Error> {
        let now = expiry::now_millis();
        self.read(|table| {
            for entry in table.range(prefix..)? {
                let (key, value) = entry?;
                let key = key.value();
                if !key.starts_with(prefix) {
                    break;
                }
                let Some(payload) = live_payload(key, value.value(), now) else {
                    continue;
                };
                if visit(key, payload).is_break() {
                    break;
                }
            }
            Ok(())
        })
    }

    pub fn delete_prefix(&self, prefix: &[u8]) -> Result<usize, Error> {
        self.write(|table| {
            let mut doomed = Vec::new();
            let range = table
                .range(prefix..)
                .map_err(|err| Error::transaction("failed to scan prefix", err))?;
            for entry in range {
                let (key, _) =
                    entry.map_err(|err| Error::transaction("failed to scan prefix", err))?;
                let key = key.value();
                if !key.starts_with(prefix) {
                    break;
                }
                doomed.push(key.to_vec());
            }
            for key in &doomed {
                table
                    .remove(key.as_slice())
                    .map_err(|err| Error::transaction("failed to delete key", err))?;
            }
            Ok(doomed.len())
        })
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&KvReadTable) -> Result<T, redb::Error>,
    ) -> Result<T, redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(KV)?;
        f(&table)
    }

    fn write<T>(&self, f: impl FnOnce(&mut KvTable<'_>) -> Result<T, Error>) -> Result<T, Error> {
        let txn = self
            .db
            .begin_write()
            .map_err(|err| Error::transaction("failed to begin write transaction", err))?;
        let outcome = {
            let mut table = txn
                .open_table(KV)
                .map_err(|err| Error::transaction("failed to open key table", err))?;
            f(&mut table)
        };
        match outcome {
            Ok(value) => {
                txn.commit()
                    .map_err(|err| Error::transaction("failed to commit transaction", err))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to abort flat write transaction");
                }
                Err(err)
            }
        }
    }

    fn exists_prefix(&self, prefix: &[u8]) -> bool {
        let mut found = false;
        let result = self.scan_prefix(prefix, &mut |_, _| {
            found = true;
            ControlFlow::Break(())
        });
        match result {
            Ok(()) => found,
            Err(err) => {
                warn!(prefix = %prefix.as_bstr(), error = %err, "flat prefix scan failed; reporting absence");
                false
            }
        }
    }

    fn delimiter_ok(&self, parts: &[(Segment, &str)]) -> bool {
        codec::is_valid(self.keys.delimiter(), parts)
    }
}

impl TableBackend for FlatBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Flat
    }

    fn delimiter(&self) -> Delimiter {
        self.keys.delimiter()
    }

    fn supports_expiry(&self) -> bool {
        true
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        debug!(path = ?self.location, "closing flat store");
        drop(self);
        Ok(())
    }

    fn set_key(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Key, key)?;
        self.set(&self.keys.plain_key(key), value, ttl)
    }

    fn read_key(&self, key: &str) -> Option<Vec<u8>> {
        if !self.delimiter_ok(&[(Segment::Key, key)]) {
            return None;
        }
        self.get(&self.keys.plain_key(key))
            .unwrap_or_else(|err| read_failed(key.as_bytes(), err))
    }

    fn delete_key(&self, key: &str) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Key, key)?;
        self.delete(&self.keys.plain_key(key))
    }

    fn set_table(&self, table: &str, rows: &TableRows, ttl: Option<Duration>) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Table, table)?;
        for (id, row) in rows {
            codec::validate_row(self.delimiter(), table, id, row.keys())?;
        }
        let writes: Vec<(Vec<u8>, &[u8])> = rows
            .iter()
            .flat_map(|(id, row)| {
                row.iter().map(move |(field, value)| {
                    (self.keys.field_key(table, id, field), value.as_slice())
                })
            })
            .collect();
        self.batch_set(&writes, ttl)
    }

    fn set_row(&self, table: &str, id: &str, row: &Row, ttl: Option<Duration>) -> Result<(), Error> {
        codec::validate_row(self.delimiter(), table, id, row.keys())?;
        let writes: Vec<(Vec<u8>, &[u8])> = row
            .iter()
            .map(|(field, value)| (self.keys.field_key(table, id, field), value.as_slice()))
            .collect();
        self.batch_set(&writes, ttl)
    }

    fn set_value(
        &self,
        table: &str,
        id: &str,
        field: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Table, table)?;
        codec::validate(self.delimiter(), Segment::Id, id)?;
        codec::validate(self.delimiter(), Segment::Field, field)?;
        self.set(&self.keys.field_key(table, id, field), value, ttl)
    }

    fn exists_table(&self, table: &str) -> bool {
        self.delimiter_ok(&[(Segment::Table, table)])
            && self.exists_prefix(&self.keys.table_prefix(table))
    }

    fn exists_record(&self, table: &str, id: &str) -> bool {
        self.delimiter_ok(&[(Segment::Table, table), (Segment::Id, id)])
            && self.exists_prefix(&self.keys.record_prefix(table, id))
    }

    fn read_row(&self, table: &str, id: &str) -> Row {
        let mut row = Row::new();
        if !self.delimiter_ok(&[(Segment::Table, table), (Segment::Id, id)]) {
            return row;
        }
        let prefix = self.keys.record_prefix(table, id);
        let result = self.scan_prefix(&prefix, &mut |key, value| {
            if let Some(field) = self.keys.field_name(key, prefix.len()) {
                row.insert(field.to_string(), value.to_vec());
            }
            ControlFlow::Continue(())
        });
        if let Err(err) = result {
            warn!(table, id, error = %err, "flat row read failed; reporting empty row");
            return Row::new();
        }
        row
    }

    fn read_value(&self, table: &str, id: &str, field: &str) -> Option<Vec<u8>> {
        if !self.delimiter_ok(&[
            (Segment::Table, table),
            (Segment::Id, id),
            (Segment::Field, field),
        ]) {
            return None;
        }
        let key = self.keys.field_key(table, id, field);
        self.get(&key).unwrap_or_else(|err| read_failed(&key, err))
    }

    fn delete_table(&self, table: &str) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Table, table)?;
        let removed = self.delete_prefix(&self.keys.table_prefix(table))?;
        debug!(table, removed, "deleted flat table");
        Ok(())
    }

    fn delete_record(&self, table: &str, id: &str) -> Result<(), Error> {
        codec::validate(self.delimiter(), Segment::Table, table)?;
        codec::validate(self.delimiter(), Segment::Id, id)?;
        self.delete_prefix(&self.keys.record_prefix(table, id))?;
        Ok(())
    }

    fn visit_records(&self, table: &str, visit: &mut RecordVisitor<'_>) {
        if !self.delimiter_ok(&[(Segment::Table, table)]) {
            return;
        }
        // Keys of one record are contiguous, so rows are assembled by grouping
        // consecutive keys that share an id segment.
        let prefix = self.keys.table_prefix(table);
        let mut current: Option<(String, Row)> = None;
        let mut stopped = false;
        let result = self.scan_prefix(&prefix, &mut |key, value| {
            let Some((id, field)) = self.keys.split_record(key, prefix.len()) else {
                return ControlFlow::Continue(());
            };
            if let Some((current_id, row)) = current.as_mut() {
                if current_id.as_str() == id {
                    row.insert(field.to_string(), value.to_vec());
                    return ControlFlow::Continue(());
                }
            }
            let fresh = (id.to_string(), Row::from([(field.to_string(), value.to_vec())]));
            if let Some((done_id, done_row)) = current.replace(fresh) {
                if visit(&done_id, &done_row).is_break() {
                    stopped = true;
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        if let Err(err) = result {
            warn!(table, error = %err, "flat table scan failed; stopping early");
            return;
        }
        if !stopped {
            if let Some((id, row)) = current {
                let _ = visit(&id, &row);
            }
        }
    }
}

fn put(table: &mut KvTable<'_>, key: &[u8], value: &[u8]) -> Result<(), Error> {
    #[cfg(test)]
    super::failpoint::hit()?;
    table
        .insert(key, value)
        .map_err(|err| Error::transaction("failed to write key", err))?;
    Ok(())
}

fn live_payload<'v>(key: &[u8], stored: &'v [u8], now_ms: u64) -> Option<&'v [u8]> {
    match expiry::unwrap(stored, now_ms) {
        Stored::Live(payload) => Some(payload),
        Stored::Expired => None,
        Stored::Malformed => {
            warn!(key = %key.as_bstr(), "ignoring value without a valid envelope");
            None
        }
    }
}

fn read_failed(key: &[u8], err: redb::Error) -> Option<Vec<u8>> {
    warn!(key = %key.as_bstr(), error = %err, "flat read failed; reporting absence");
    None
}

fn open_error(path: &Path, err: DatabaseError) -> Error {
    let hint = match err {
        DatabaseError::DatabaseAlreadyOpen => {
            "Another handle already has this database open; close it first."
        }
        _ => "Check that the parent directory exists and is writable.",
    };
    Error::new(ErrorKind::OpenFailed)
        .with_message("failed to open flat store")
        .with_hint(hint)
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::backend::failpoint;

    fn memory_store() -> FlatBackend {
        let options = StoreOptions::new(StorageKind::Flat, "memory").in_memory(true);
        FlatBackend::open(&options).expect("open in-memory flat store")
    }

    fn row(pairs: &[(&str, &[u8])]) -> Row {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), value.to_vec()))
            .collect()
    }

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let store = memory_store();
        store.set(b"a`2`x", b"2", None).expect("set");
        store.set(b"a`1`x", b"1", None).expect("set");
        store.set(b"ab`1`x", b"other", None).expect("set");

        let mut seen = Vec::new();
        store
            .scan_prefix(b"a`", &mut |key, value| {
                seen.push((key.to_vec(), value.to_vec()));
                ControlFlow::Continue(())
            })
            .expect("scan");
        assert_eq!(
            seen,
            vec![
                (b"a`1`x".to_vec(), b"1".to_vec()),
                (b"a`2`x".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn failed_batch_leaves_nothing_behind() {
        let store = memory_store();
        failpoint::fail_after(1);
        let err = store
            .set_row(
                "test",
                "id1",
                &row(&[("f1", b"v1"), ("f2", b"v2")]),
                None,
            )
            .expect_err("injected failure");
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(store.read_row("test", "id1").is_empty());
        assert!(!store.exists_record("test", "id1"));
        assert!(!store.exists_table("test"));
    }

    #[test]
    fn expired_values_read_as_absent() {
        let store = memory_store();
        store
            .set_value("t", "i", "short", b"x", Some(Duration::from_millis(1)))
            .expect("set");
        store
            .set_value("t", "i", "long", b"y", Some(Duration::from_secs(3600)))
            .expect("set");
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.read_value("t", "i", "short"), None);
        assert_eq!(store.read_value("t", "i", "long"), Some(b"y".to_vec()));
        assert_eq!(store.read_row("t", "i"), row(&[("long", b"y")]));
    }

    #[test]
    fn fully_expired_table_does_not_exist() {
        let store = memory_store();
        store
            .set_key("k", b"v", Some(Duration::from_millis(1)))
            .expect("set key");
        store
            .set_value("t", "i", "f", b"x", Some(Duration::from_millis(1)))
            .expect("set");
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.read_key("k"), None);
        assert!(!store.exists_table("t"));
        assert!(store.read_table("t").is_empty());
    }

    #[test]
    fn delete_prefix_reports_removed_keys() {
        let store = memory_store();
        store
            .set_row("t", "1", &row(&[("a", b"1"), ("b", b"2")]), None)
            .expect("set");
        store.set_row("t", "2", &row(&[("a", b"3")]), None).expect("set");
        store.set_row("tt", "1", &row(&[("a", b"4")]), None).expect("set");

        let removed = store
            .delete_prefix(&store.keys.table_prefix("t"))
            .expect("delete");
        assert_eq!(removed, 3);
        assert!(store.exists_table("tt"));
    }

    #[test]
    fn records_are_grouped_by_id() {
        let store = memory_store();
        store
            .set_row("t", "a", &row(&[("x", b"1"), ("y", b"2")]), None)
            .expect("set");
        store.set_row("t", "b", &row(&[("x", b"3")]), None).expect("set");

        let mut seen = Vec::new();
        store.visit_records("t", &mut |id, record| {
            seen.push((id.to_string(), record.len()));
            ControlFlow::Continue(())
        });
        assert_eq!(seen, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = StoreOptions::new(StorageKind::Flat, dir.path().join("flat.redb"));
        {
            let store = FlatBackend::open(&options).expect("open");
            store.set_value("t", "i", "f", b"persisted", None).expect("set");
            Box::new(store).close().expect("close");
        }
        let store = FlatBackend::open(&options).expect("reopen");
        assert_eq!(store.read_value("t", "i", "f"), Some(b"persisted".to_vec()));
    }

    #[test]
    fn missing_parent_directory_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = StoreOptions::new(StorageKind::Flat, dir.path().join("no/such/dir/db"));
        match FlatBackend::open(&options) {
            Ok(_) => panic!("expected open failure"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::OpenFailed),
        }
    }
}
