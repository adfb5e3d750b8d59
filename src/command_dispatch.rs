//! Purpose: Hold top-level CLI command dispatch for `tablekv`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command prints exactly one JSON document on success.
//! Invariants: The store is closed even when the command fails; the command error wins.

use super::*;

pub(super) fn dispatch_command(command: Command, options: StoreOptions) -> Result<(), Error> {
    if let Command::Completion { shell } = command {
        let mut cmd = Cli::command();
        clap_complete::aot::generate(shell, &mut cmd, "tablekv", &mut io::stdout());
        return Ok(());
    }

    let store = Store::open(options)?;
    tracing::debug!(kind = %store.kind(), delimiter = %store.delimiter(), "store opened");
    let result = run_command(command, &store);
    let closed = store.close();
    result?;
    closed
}

fn run_command(command: Command, store: &Store) -> Result<(), Error> {
    match command {
        Command::Completion { .. } => Ok(()),
        Command::Key { command } => match command {
            KeyCommand::Set { key, value, ttl } => {
                store.set_key(&key, &value.bytes()?, ttl.duration())?;
                emit_json(json!({ "key": key, "written": true }));
                Ok(())
            }
            KeyCommand::Get { key } => {
                let value = store.read_key(&key);
                emit_json(json!({ "key": key, "value": optional_value_json(value.as_deref()) }));
                Ok(())
            }
            KeyCommand::Delete { key } => {
                store.delete_key(&key)?;
                emit_json(json!({ "key": key, "deleted": true }));
                Ok(())
            }
        },
        Command::Table { command } => match command {
            TableCommand::Set {
                table,
                records,
                ttl,
            } => {
                let rows = parse_table(&records)?;
                store.set_table(&table, &rows, ttl.duration())?;
                emit_json(json!({ "table": table, "records": rows.len() }));
                Ok(())
            }
            TableCommand::Get { table } => {
                let rows = store.read_table(&table);
                emit_json(json!({ "table": table, "records": table_json(&rows) }));
                Ok(())
            }
            TableCommand::Exists { table } => {
                let exists = store.exists_table(&table);
                emit_json(json!({ "table": table, "exists": exists }));
                Ok(())
            }
            TableCommand::Delete { table } => {
                store.delete_table(&table)?;
                emit_json(json!({ "table": table, "deleted": true }));
                Ok(())
            }
            TableCommand::Scan {
                table,
                field,
                op,
                threshold,
            } => {
                let ids = store.scan_table(&table, &field, &op, threshold)?;
                let report = ScanReport {
                    table: &table,
                    field: &field,
                    op: &op,
                    threshold,
                    ids,
                };
                emit_json(serde_json::to_value(&report).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode scan report")
                        .with_source(err)
                })?);
                Ok(())
            }
        },
        Command::Row { command } => match command {
            RowCommand::Set {
                table,
                id,
                fields,
                ttl,
            } => {
                let row = parse_row(&fields)?;
                store.set_row(&table, &id, &row, ttl.duration())?;
                emit_json(json!({ "table": table, "id": id, "fields": row.len() }));
                Ok(())
            }
            RowCommand::Get { table, id } => {
                let row = store.read_row(&table, &id);
                emit_json(json!({ "table": table, "id": id, "fields": row_json(&row) }));
                Ok(())
            }
            RowCommand::Exists { table, id } => {
                let exists = store.exists_record(&table, &id);
                emit_json(json!({ "table": table, "id": id, "exists": exists }));
                Ok(())
            }
            RowCommand::Delete { table, id } => {
                store.delete_record(&table, &id)?;
                emit_json(json!({ "table": table, "id": id, "deleted": true }));
                Ok(())
            }
        },
        Command::Value { command } => match command {
            ValueCommand::Set {
                table,
                id,
                field,
                value,
                ttl,
            } => {
                store.set_value(&table, &id, &field, &value.bytes()?, ttl.duration())?;
                emit_json(json!({ "table": table, "id": id, "field": field, "written": true }));
                Ok(())
            }
            ValueCommand::Get { table, id, field } => {
                let value = store.read_value(&table, &id, &field);
                emit_json(json!({
                    "table": table,
                    "id": id,
                    "field": field,
                    "value": optional_value_json(value.as_deref()),
                }));
                Ok(())
            }
            ValueCommand::Equals {
                table,
                id,
                field,
                value,
            } => {
                let equal = store.value_equals(&table, &id, &field, &value.bytes()?);
                emit_json(json!({ "table": table, "id": id, "field": field, "equals": equal }));
                Ok(())
            }
        },
    }
}

#[derive(Serialize)]
struct ScanReport<'a> {
    table: &'a str,
    field: &'a str,
    op: &'a str,
    threshold: i64,
    ids: Vec<String>,
}
