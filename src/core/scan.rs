// Predicate scan: ids of records whose field satisfies `threshold <op> value`.
use std::ops::ControlFlow;

use crate::core::backend::TableBackend;
use crate::core::error::Error;
use crate::core::predicate::{self, Operator};

/// Returns matching ids in ascending id order. Records without `field` never match.
///
/// The operator is parsed before the table is touched, so an unknown token fails even
/// when the table is absent.
pub fn scan_table(
    backend: &dyn TableBackend,
    table: &str,
    field: &str,
    operator: &str,
    threshold: i64,
) -> Result<Vec<String>, Error> {
    let op: Operator = operator.parse()?;
    let mut matches = Vec::new();
    backend.visit_records(table, &mut |id, row| {
        if let Some(value) = row.get(field) {
            if predicate::evaluate(op, threshold, value) {
                matches.push(id.to_string());
            }
        }
        ControlFlow::Continue(())
    });
    // The flat engine orders `a!` before `a` (the delimiter sorts after `!`);
    // sorting keeps both engines' output identical.
    matches.sort_unstable();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{FlatBackend, Row, TableRows};
    use crate::core::error::ErrorKind;
    use crate::core::options::{StorageKind, StoreOptions};
    use crate::core::predicate::encode_be;

    fn store() -> FlatBackend {
        let options = StoreOptions::new(StorageKind::Flat, "memory").in_memory(true);
        FlatBackend::open(&options).expect("open")
    }

    fn seed(store: &FlatBackend) {
        let mut rows = TableRows::new();
        rows.insert(
            "id1".to_string(),
            Row::from([
                ("field1".to_string(), b"1111111111".to_vec()),
                ("field2".to_string(), b"222222222222".to_vec()),
            ]),
        );
        rows.insert(
            "id2".to_string(),
            Row::from([
                ("field1".to_string(), b"aaaaaaaaaaaaa".to_vec()),
                ("field2".to_string(), encode_be(19986)),
            ]),
        );
        rows.insert(
            "id3".to_string(),
            Row::from([
                ("field1".to_string(), b"aaaaaaaaaaaaaaa".to_vec()),
                ("field2".to_string(), b"@@@@@@@@@@@@@@@@".to_vec()),
            ]),
        );
        rows.insert(
            "id4".to_string(),
            Row::from([("field1".to_string(), b"no field2 here".to_vec())]),
        );
        store.set_table("test", &rows, None).expect("seed");
    }

    #[test]
    fn equality_selects_exact_value() {
        let store = store();
        seed(&store);
        let ids = scan_table(&store, "test", "field2", "=", 19986).expect("scan");
        assert_eq!(ids, vec!["id2".to_string()]);
    }

    #[test]
    fn records_without_field_are_skipped() {
        let store = store();
        seed(&store);
        let ids = scan_table(&store, "test", "field2", "<", 0).expect("scan");
        assert_eq!(ids, vec!["id1", "id2", "id3"]);
        let ids = scan_table(&store, "test", "field2", ">", 0).expect("scan");
        assert!(ids.is_empty());
    }

    #[test]
    fn unknown_operator_fails_even_for_missing_table() {
        let store = store();
        let err = scan_table(&store, "absent", "field2", "~", 1).expect_err("operator");
        assert_eq!(err.kind(), ErrorKind::InvalidPredicateOperator);
    }

    #[test]
    fn wide_values_never_equal_small_thresholds() {
        let store = store();
        let mut wide = vec![0x01];
        wide.extend_from_slice(&[0u8; 16]);
        store.set_value("t", "wide", "n", &wide, None).expect("set wide");
        store.set_value("t", "zero", "n", &[0], None).expect("set zero");

        let ids = scan_table(&store, "t", "n", "==", 0).expect("eq");
        assert_eq!(ids, vec!["zero"]);
        let ids = scan_table(&store, "t", "n", "<", 0).expect("lt");
        assert_eq!(ids, vec!["wide"]);
    }

    #[test]
    fn missing_table_yields_no_ids() {
        let store = store();
        let ids = scan_table(&store, "absent", "field2", "!=", 1).expect("scan");
        assert!(ids.is_empty());
    }
}
