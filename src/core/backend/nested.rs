//! Purpose: Table service over native nested buckets (jammdb, a BoltDB-style engine).
//! Exports: `NestedBackend`, `Child`.
//! Role: Bucket `table` → sub-bucket `id` → key `field`; ungrouped keys live in `_root`.
//! Invariants: Existence checks are direct bucket lookups, never scans.
//! Invariants: Empty record or table buckets are never left behind, so existence agrees
//! with the flat backend's "at least one field" rule.
//! Invariants: No expiry and no in-memory mode; both are refused before touching the engine.
//! Invariants: `<path>.lock` stays on disk after close; only the lock on it is released.
//! Deleting it would let a waiter and a later opener lock different inodes.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jammdb::{Bucket, DB, Data, Error as EngineError, Tx};
use tracing::{debug, warn};

use super::{RecordVisitor, Row, TableBackend, TableRows, ensure_expiry};
use crate::core::codec::{self, Delimiter, NestedPath, ROOT_BUCKET, Segment};
use crate::core::error::{Error, ErrorKind};
use crate::core::lock::OpenLock;
use crate::core::options::{StorageKind, StoreOptions};

/// How long `open` waits for another handle to release the store.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(1);

/// One entry directly under a bucket.
#[derive(Debug, Eq, PartialEq)]
pub enum Child<'a> {
    Namespace(&'a [u8]),
    Value(&'a [u8], &'a [u8]),
}

pub struct NestedBackend {
    db: DB,
    delimiter: Delimiter,
    path: PathBuf,
    lock: OpenLock,
}

impl NestedBackend {
    pub fn open(options: &StoreOptions) -> Result<Self, Error> {
        if options.in_memory {
            return Err(Error::new(ErrorKind::UnsupportedOperation)
                .with_message("hierarchical storage has no in-memory mode")
                .with_hint("Use the flat engine for in-memory stores."));
        }
        let lock = OpenLock::acquire(lock_path(options.path()), OPEN_TIMEOUT)?;
        let db = DB::open(options.path()).map_err(|err| {
            Error::new(ErrorKind::OpenFailed)
                .with_message("failed to open hierarchical store")
                .with_path(options.path())
                .with_source(err)
        })?;
        debug!(path = %options.path().display(), "opened hierarchical store");
        Ok(Self {
            db,
            delimiter: options.delimiter,
            path: options.path.clone(),
            lock,
        })
    }

    pub fn get(&self, path: NestedPath<'_>) -> Result<Option<Vec<u8>>, EngineError> {
        let (Some(id), Some(field)) = (path.sub_bucket(), path.key()) else {
            return Ok(None);
        };
        self.view(|tx| {
            let Some(table) = found(tx.get_bucket(path.bucket()))? else {
                return Ok(None);
            };
            let Some(record) = found(table.get_bucket(id))? else {
                return Ok(None);
            };
            Ok(value_of(record.get(field)))
        })
    }

    /// Writes every field in one transaction, creating buckets on demand.
    pub fn batch_set(&self, writes: &[(NestedPath<'_>, &[u8])]) -> Result<(), Error> {
        if writes.is_empty() {
            return Ok(());
        }
        self.update(|tx| {
            for (path, value) in writes {
                let (Some(id), Some(field)) = (path.sub_bucket(), path.key()) else {
                    return Err(Error::new(ErrorKind::Internal)
                        .with_message("field write without a record path"));
                };
                let table = tx.get_or_create_bucket(path.bucket()).map_err(write_error)?;
                let record = table.get_or_create_bucket(id).map_err(write_error)?;
                put(&record, field, value.to_vec())?;
            }
            Ok(())
        })
    }

    /// Removes a table, a record, or a single field depending on path depth.
    pub fn delete(&self, path: NestedPath<'_>) -> Result<(), Error> {
        self.update(|tx| {
            let Some(id) = path.sub_bucket() else {
                return ignore_missing(tx.delete_bucket(path.bucket()));
            };
            let emptied = {
                let Some(table) = found(tx.get_bucket(path.bucket())).map_err(write_error)? else {
                    return Ok(());
                };
                match path.key() {
                    None => ignore_missing(table.delete_bucket(id))?,
                    Some(field) => {
                        let record_emptied = {
                            let Some(record) =
                                found(table.get_bucket(id.clone())).map_err(write_error)?
                            else {
                                return Ok(());
                            };
                            ignore_missing(record.delete(field).map(|_| ()))?;
                            record.cursor().next().is_none()
                        };
                        if record_emptied {
                            ignore_missing(table.delete_bucket(id))?;
                        }
                    }
                }
                table.cursor().next().is_none()
            };
            if emptied {
                ignore_missing(tx.delete_bucket(path.bucket()))?;
            }
            Ok(())
        })
    }

    /// Visits the direct children of a table or record bucket in key order.
    pub fn list_children(
        &self,
        path: NestedPath<'_>,
        visit: &mut dyn FnMut(Child<'_>) -> ControlFlow<()>,
    ) -> Result<(), EngineError> {
        self.view(|tx| {
            let Some(table) = found(tx.get_bucket(path.bucket()))? else {
                return Ok(());
            };
            match path.sub_bucket() {
                None => walk(&table, visit),
                Some(id) => {
                    if let Some(record) = found(table.get_bucket(id))? {
                        walk(&record, visit);
                    }
                }
            }
            Ok(())
        })
    }

    fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, EngineError>) -> Result<T, EngineError> {
        let tx = self.db.tx(false)?;
        f(&tx)
    }

    fn update<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, Error>) -> Result<T, Error> {
        let tx = self
            .db
            .tx(true)
            .map_err(|err| Error::transaction("failed to begin write transaction", err))?;
        // Dropping an uncommitted transaction discards its writes.
        let value = f(&tx)?;
        tx.commit()
            .map_err(|err| Error::transaction("failed to commit transaction", err))?;
        Ok(value)
    }

    fn exists(&self, path: NestedPath<'_>) -> bool {
        let result = self.view(|tx| {
            let Some(table) = found(tx.get_bucket(path.bucket()))? else {
                return Ok(false);
            };
            match path.sub_bucket() {
                None => Ok(true),
                Some(id) => Ok(found(table.get_bucket(id))?.is_some()),
            }
        });
        result.unwrap_or_else(|err| {
            warn!(table = path.table, error = %err, "hierarchical lookup failed; reporting absence");
            false
        })
    }

    fn delimiter_ok(&self, parts: &[(Segment, &str)]) -> bool {
        codec::is_valid(self.delimiter, parts)
    }
}

impl TableBackend for NestedBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Hierarchical
    }

    fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    fn supports_expiry(&self) -> bool {
        false
    }

    fn close(self: Box<Self>) -> Result<(), Error> {
        debug!(
            path = %self.path.display(),
            lock = %self.lock.path().display(),
            "closing hierarchical store"
        );
        drop(self);
        Ok(())
    }

    fn set_key(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        ensure_expiry(self.kind(), self.supports_expiry(), ttl)?;
        codec::validate(self.delimiter, Segment::Key, key)?;
        self.update(|tx| {
            let root = tx
                .get_or_create_bucket(ROOT_BUCKET.as_bytes().to_vec())
                .map_err(write_error)?;
            put(&root, key.as_bytes().to_vec(), value.to_vec())
        })
    }

    fn read_key(&self, key: &str) -> Option<Vec<u8>> {
        if !self.delimiter_ok(&[(Segment::Key, key)]) {
            return None;
        }
        let result = self.view(|tx| {
            let Some(root) = found(tx.get_bucket(ROOT_BUCKET.as_bytes().to_vec()))? else {
                return Ok(None);
            };
            Ok(value_of(root.get(key.as_bytes().to_vec())))
        });
        result.unwrap_or_else(|err| {
            warn!(key, error = %err, "hierarchical key read failed; reporting absence");
            None
        })
    }

    fn delete_key(&self, key: &str) -> Result<(), Error> {
        codec::validate(self.delimiter, Segment::Key, key)?;
        self.update(|tx| {
            let Some(root) =
                found(tx.get_bucket(ROOT_BUCKET.as_bytes().to_vec())).map_err(write_error)?
            else {
                return Ok(());
            };
            ignore_missing(root.delete(key.as_bytes().to_vec()).map(|_| ()))
        })
    }

    fn set_table(&self, table: &str, rows: &TableRows, ttl: Option<Duration>) -> Result<(), Error> {
        ensure_expiry(self.kind(), self.supports_expiry(), ttl)?;
        codec::validate(self.delimiter, Segment::Table, table)?;
        for (id, row) in rows {
            codec::validate_row(self.delimiter, table, id, row.keys())?;
        }
        let writes: Vec<(NestedPath<'_>, &[u8])> = rows
            .iter()
            .flat_map(|(id, row)| {
                row.iter()
                    .map(move |(field, value)| (NestedPath::field(table, id, field), value.as_slice()))
            })
            .collect();
        self.batch_set(&writes)
    }

    fn set_row(&self, table: &str, id: &str, row: &Row, ttl: Option<Duration>) -> Result<(), Error> {
        ensure_expiry(self.kind(), self.supports_expiry(), ttl)?;
        codec::validate_row(self.delimiter, table, id, row.keys())?;
        let writes: Vec<(NestedPath<'_>, &[u8])> = row
            .iter()
            .map(|(field, value)| (NestedPath::field(table, id, field), value.as_slice()))
            .collect();
        self.batch_set(&writes)
    }

    fn set_value(
        &self,
        table: &str,
        id: &str,
        field: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        ensure_expiry(self.kind(), self.supports_expiry(), ttl)?;
        codec::validate(self.delimiter, Segment::Table, table)?;
        codec::validate(self.delimiter, Segment::Id, id)?;
        codec::validate(self.delimiter, Segment::Field, field)?;
        self.batch_set(&[(NestedPath::field(table, id, field), value)])
    }

    fn exists_table(&self, table: &str) -> bool {
        self.delimiter_ok(&[(Segment::Table, table)]) && self.exists(NestedPath::table(table))
    }

    fn exists_record(&self, table: &str, id: &str) -> bool {
        self.delimiter_ok(&[(Segment::Table, table), (Segment::Id, id)])
            && self.exists(NestedPath::record(table, id))
    }

    fn read_row(&self, table: &str, id: &str) -> Row {
        let mut row = Row::new();
        if !self.delimiter_ok(&[(Segment::Table, table), (Segment::Id, id)]) {
            return row;
        }
        let result = self.list_children(NestedPath::record(table, id), &mut |child| {
            if let Child::Value(key, value) = child {
                if let Ok(field) = std::str::from_utf8(key) {
                    row.insert(field.to_string(), value.to_vec());
                }
            }
            ControlFlow::Continue(())
        });
        if let Err(err) = result {
            warn!(table, id, error = %err, "hierarchical row read failed; reporting empty row");
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
        self.get(NestedPath::field(table, id, field))
            .unwrap_or_else(|err| {
                warn!(table, id, field, error = %err, "hierarchical read failed; reporting absence");
                None
            })
    }

    fn delete_table(&self, table: &str) -> Result<(), Error> {
        codec::validate(self.delimiter, Segment::Table, table)?;
        self.delete(NestedPath::table(table))?;
        debug!(table, "deleted hierarchical table");
        Ok(())
    }

    fn delete_record(&self, table: &str, id: &str) -> Result<(), Error> {
        codec::validate(self.delimiter, Segment::Table, table)?;
        codec::validate(self.delimiter, Segment::Id, id)?;
        self.delete(NestedPath::record(table, id))
    }

    fn visit_records(&self, table: &str, visit: &mut RecordVisitor<'_>) {
        if !self.delimiter_ok(&[(Segment::Table, table)]) {
            return;
        }
        let result = self.view(|tx| {
            let Some(bucket) = found(tx.get_bucket(table.as_bytes().to_vec()))? else {
                return Ok(());
            };
            let ids: Vec<String> = bucket
                .cursor()
                .filter_map(|data| match data {
                    Data::Bucket(name) => std::str::from_utf8(name.name()).ok().map(str::to_string),
                    Data::KeyValue(_) => None,
                })
                .collect();
            for id in ids {
                let Some(record) = found(bucket.get_bucket(id.as_bytes().to_vec()))? else {
                    continue;
                };
                let mut row = Row::new();
                walk(&record, &mut |child| {
                    if let Child::Value(key, value) = child {
                        if let Ok(field) = std::str::from_utf8(key) {
                            row.insert(field.to_string(), value.to_vec());
                        }
                    }
                    ControlFlow::Continue(())
                });
                if visit(&id, &row).is_break() {
                    break;
                }
            }
            Ok(())
        });
        if let Err(err) = result {
            warn!(table, error = %err, "hierarchical table scan failed; stopping early");
        }
    }
}

fn walk(bucket: &Bucket<'_, '_>, visit: &mut dyn FnMut(Child<'_>) -> ControlFlow<()>) {
    for data in bucket.cursor() {
        let flow = match &data {
            Data::Bucket(name) => visit(Child::Namespace(name.name())),
            Data::KeyValue(kv) => visit(Child::Value(kv.key(), kv.value())),
        };
        if flow.is_break() {
            break;
        }
    }
}

fn put(bucket: &Bucket<'_, '_>, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
    #[cfg(test)]
    super::failpoint::hit()?;
    bucket.put(key, value).map_err(write_error)?;
    Ok(())
}

fn value_of(data: Option<Data<'_, '_>>) -> Option<Vec<u8>> {
    match data {
        Some(Data::KeyValue(kv)) => Some(kv.value().to_vec()),
        _ => None,
    }
}

fn found<T>(result: Result<T, EngineError>) -> Result<Option<T>, EngineError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(EngineError::BucketMissing) => Ok(None),
        Err(err) => Err(err),
    }
}

fn ignore_missing(result: Result<(), EngineError>) -> Result<(), Error> {
    match result {
        Ok(()) | Err(EngineError::BucketMissing) | Err(EngineError::KeyValueMissing) => Ok(()),
        Err(err) => Err(write_error(err)),
    }
}

fn write_error(err: EngineError) -> Error {
    Error::transaction("hierarchical write failed", err)
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::failpoint;

    fn temp_store() -> (tempfile::TempDir, NestedBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = StoreOptions::new(StorageKind::Hierarchical, dir.path().join("nested.db"));
        let store = NestedBackend::open(&options).expect("open nested store");
        (dir, store)
    }

    fn row(pairs: &[(&str, &[u8])]) -> Row {
        pairs
            .iter()
            .map(|(field, value)| (field.to_string(), value.to_vec()))
            .collect()
    }

    #[test]
    fn failed_batch_leaves_nothing_behind() {
        let (_dir, store) = temp_store();
        failpoint::fail_after(1);
        let err = store
            .set_row("test", "id1", &row(&[("f1", b"v1"), ("f2", b"v2")]), None)
            .expect_err("injected failure");
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(store.read_row("test", "id1").is_empty());
        assert!(!store.exists_table("test"));
    }

    #[test]
    fn expiry_is_refused() {
        let (_dir, store) = temp_store();
        let err = store
            .set_value("t", "i", "f", b"v", Some(Duration::from_secs(1)))
            .expect_err("ttl unsupported");
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(!store.exists_table("t"));

        let err = store
            .set_key("k", b"v", Some(Duration::from_secs(1)))
            .expect_err("ttl unsupported");
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn in_memory_mode_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options =
            StoreOptions::new(StorageKind::Hierarchical, dir.path().join("n.db")).in_memory(true);
        match NestedBackend::open(&options) {
            Ok(_) => panic!("expected unsupported"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::UnsupportedOperation),
        }
    }

    #[test]
    fn second_open_times_out() {
        let (dir, _store) = temp_store();
        let options = StoreOptions::new(StorageKind::Hierarchical, dir.path().join("nested.db"));
        match NestedBackend::open(&options) {
            Ok(_) => panic!("expected lock timeout"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::OpenFailed),
        }
    }

    #[test]
    fn lock_sidecar_persists_and_is_reusable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested.db");
        let options = StoreOptions::new(StorageKind::Hierarchical, &db_path);
        let sidecar = lock_path(&db_path);
        assert_eq!(sidecar, dir.path().join("nested.db.lock"));

        let store = NestedBackend::open(&options).expect("open");
        Box::new(store).close().expect("close");
        assert!(sidecar.exists());

        let store = NestedBackend::open(&options).expect("reopen after close");
        Box::new(store).close().expect("close");
    }

    #[test]
    fn deleting_last_record_drops_table_bucket() {
        let (_dir, store) = temp_store();
        store.set_value("t", "a", "f", b"1", None).expect("set");
        store.set_value("t", "b", "f", b"2", None).expect("set");

        store.delete_record("t", "a").expect("delete a");
        assert!(store.exists_table("t"));
        store.delete_record("t", "b").expect("delete b");
        assert!(!store.exists_table("t"));
    }

    #[test]
    fn empty_rows_create_no_namespaces() {
        let (_dir, store) = temp_store();
        store.set_row("t", "a", &Row::new(), None).expect("empty row");
        assert!(!store.exists_table("t"));
        assert!(!store.exists_record("t", "a"));
    }

    #[test]
    fn children_distinguish_namespaces_from_values() {
        let (_dir, store) = temp_store();
        store.set_row("t", "a", &row(&[("x", b"1")]), None).expect("set");
        store.set_row("t", "b", &row(&[("y", b"2")]), None).expect("set");

        let mut tables = Vec::new();
        store
            .list_children(NestedPath::table("t"), &mut |child| {
                tables.push(matches!(child, Child::Namespace(_)));
                ControlFlow::Continue(())
            })
            .expect("list");
        assert_eq!(tables, vec![true, true]);

        let mut fields = Vec::new();
        store
            .list_children(NestedPath::record("t", "a"), &mut |child| {
                if let Child::Value(key, value) = child {
                    fields.push((key.to_vec(), value.to_vec()));
                }
                ControlFlow::Continue(())
            })
            .expect("list");
        assert_eq!(fields, vec![(b"x".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn plain_keys_stay_out_of_tables() {
        let (_dir, store) = temp_store();
        store.set_key("k", b"v", None).expect("set key");
        assert_eq!(store.read_key("k"), Some(b"v".to_vec()));
        assert!(!store.exists_table(ROOT_BUCKET));
        store.delete_key("k").expect("delete");
        store.delete_key("k").expect("delete again");
        assert_eq!(store.read_key("k"), None);
    }

    #[test]
    fn field_delete_prunes_empty_buckets() {
        let (_dir, store) = temp_store();
        store.set_value("t", "a", "f", b"1", None).expect("set");
        store.delete(NestedPath::field("t", "a", "f")).expect("delete field");
        assert!(!store.exists_record("t", "a"));
        assert!(!store.exists_table("t"));
    }
}
