//! Purpose: `tablekv` CLI entry point.
//! Role: Binary crate root; parses args, opens one store, runs one command, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: The store is opened once per invocation and closed before exit.
#![allow(clippy::result_large_err)]
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bstr::ByteSlice;
use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use tablekv::api::{
    DEFAULT_DELIMITER, Error, ErrorKind, Row, StorageKind, Store, StoreOptions, TableRows,
    decode_be, encode_be, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "tablekv",
    version,
    about = "Tables of records over flat or nested embedded key-value stores",
    long_about = r#"Store named tables of records (id -> field -> bytes) in an embedded database.

The flat engine keeps every field under a delimiter-joined key; the hierarchical
engine nests tables and records as buckets. Both behave identically."#
)]
struct Cli {
    #[arg(
        long,
        default_value = "flat",
        value_parser = parse_kind,
        help = "Storage engine: flat (0) | hierarchical (1, nested)"
    )]
    kind: StorageKind,
    #[arg(
        long,
        default_value = "tablekv.db",
        help = "Database file path",
        value_hint = ValueHint::FilePath
    )]
    path: PathBuf,
    #[arg(
        long,
        default_value_t = DEFAULT_DELIMITER,
        help = "Reserved character separating table, id, and field"
    )]
    delimiter: char,
    #[arg(long, help = "Keep data in memory only (flat engine)")]
    in_memory: bool,

    #[command(subcommand)]
    command: Command,
}

fn parse_kind(value: &str) -> Result<StorageKind, String> {
    value.parse::<StorageKind>().map_err(|err| {
        err.message()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string())
    })
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Read and write ungrouped keys",
        after_help = r#"EXAMPLES
  $ tablekv key set greeting hello
  $ tablekv key set session abc --ttl 60
  $ tablekv key get greeting
  $ tablekv key delete greeting"#
    )]
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
    #[command(
        arg_required_else_help = true,
        about = "Write, read, test, delete, or filter whole tables",
        after_help = r#"EXAMPLES
  $ tablekv table set test '{"id1": {"field1": "abc", "field2": 19986}}'
  $ tablekv table get test
  $ tablekv table exists test
  $ tablekv table scan test field2 == 19986
  $ tablekv table delete test

NOTES
  - JSON numbers are stored as minimal big-endian unsigned integers; strings as UTF-8.
  - scan keeps records where `THRESHOLD <OP> value` holds."#
    )]
    Table {
        #[command(subcommand)]
        command: TableCommand,
    },
    #[command(arg_required_else_help = true, about = "Write, read, test, or delete one record")]
    Row {
        #[command(subcommand)]
        command: RowCommand,
    },
    #[command(arg_required_else_help = true, about = "Write, read, or compare one field")]
    Value {
        #[command(subcommand)]
        command: ValueCommand,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum KeyCommand {
    #[command(about = "Set or overwrite a key")]
    Set {
        key: String,
        #[command(flatten)]
        value: ValueArg,
        #[command(flatten)]
        ttl: TtlArg,
    },
    #[command(about = "Read a key")]
    Get { key: String },
    #[command(about = "Delete a key (missing keys are fine)")]
    Delete { key: String },
}

#[derive(Subcommand)]
enum TableCommand {
    #[command(about = "Write every record of a JSON object atomically")]
    Set {
        table: String,
        #[arg(help = "JSON object: {\"id\": {\"field\": \"text\" | number}}")]
        records: String,
        #[command(flatten)]
        ttl: TtlArg,
    },
    #[command(about = "Read every record of a table")]
    Get { table: String },
    #[command(about = "Report whether a table has any record")]
    Exists { table: String },
    #[command(about = "Delete a table and all its records")]
    Delete { table: String },
    #[command(about = "List ids whose field satisfies THRESHOLD <OP> value")]
    Scan {
        table: String,
        field: String,
        #[arg(help = "One of >, >=, <, <=, ==, !=")]
        op: String,
        #[arg(allow_negative_numbers = true)]
        threshold: i64,
    },
}

#[derive(Subcommand)]
enum RowCommand {
    #[command(about = "Write the fields of one record atomically")]
    Set {
        table: String,
        id: String,
        #[arg(help = "JSON object: {\"field\": \"text\" | number}")]
        fields: String,
        #[command(flatten)]
        ttl: TtlArg,
    },
    #[command(about = "Read one record")]
    Get { table: String, id: String },
    #[command(about = "Report whether a record exists")]
    Exists { table: String, id: String },
    #[command(about = "Delete one record")]
    Delete { table: String, id: String },
}

#[derive(Subcommand)]
enum ValueCommand {
    #[command(about = "Write one field")]
    Set {
        table: String,
        id: String,
        field: String,
        #[command(flatten)]
        value: ValueArg,
        #[command(flatten)]
        ttl: TtlArg,
    },
    #[command(about = "Read one field")]
    Get {
        table: String,
        id: String,
        field: String,
    },
    #[command(about = "Report whether a field holds exactly the given value")]
    Equals {
        table: String,
        id: String,
        field: String,
        #[command(flatten)]
        value: ValueArg,
    },
}

#[derive(Args)]
struct ValueArg {
    #[arg(help = "Value as UTF-8 text (or an unsigned integer with --int)")]
    value: String,
    #[arg(long, help = "Store VALUE as a minimal big-endian unsigned integer")]
    int: bool,
}

impl ValueArg {
    fn bytes(&self) -> Result<Vec<u8>, Error> {
        if !self.int {
            return Ok(self.value.as_bytes().to_vec());
        }
        let number: u64 = self.value.parse().map_err(|_| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("`{}` is not an unsigned integer", self.value))
                .with_hint("Drop --int to store the text as-is.")
        })?;
        Ok(encode_be(number))
    }
}

#[derive(Args)]
struct TtlArg {
    #[arg(long, value_name = "SECONDS", help = "Expire the written values after SECONDS (flat engine)")]
    ttl: Option<u64>,
}

impl TtlArg {
    fn duration(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `tablekv --help` for usage."));
            }
        },
    };

    let options = StoreOptions::new(cli.kind, cli.path)
        .with_delimiter(cli.delimiter)
        .in_memory(cli.in_memory);
    command_dispatch::dispatch_command(cli.command, options)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn parse_json_object(text: &str, what: &str) -> Result<Map<String, Value>, Error> {
    let value: Value = serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{what} must be valid JSON"))
            .with_source(err)
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::new(ErrorKind::Usage).with_message(format!("{what} must be a JSON object"))),
    }
}

fn json_to_bytes(value: &Value, field: &str) -> Result<Vec<u8>, Error> {
    match value {
        Value::String(text) => Ok(text.as_bytes().to_vec()),
        Value::Number(number) => number.as_u64().map(encode_be).ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("field `{field}` must be an unsigned integer or a string"))
        }),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("field `{field}` must be a string or a number"))),
    }
}

fn parse_row(text: &str) -> Result<Row, Error> {
    row_from_map(&parse_json_object(text, "fields")?)
}

fn row_from_map(map: &Map<String, Value>) -> Result<Row, Error> {
    map.iter()
        .map(|(field, value)| Ok((field.clone(), json_to_bytes(value, field)?)))
        .collect()
}

fn parse_table(text: &str) -> Result<TableRows, Error> {
    parse_json_object(text, "records")?
        .iter()
        .map(|(id, fields)| match fields {
            Value::Object(map) => Ok((id.clone(), row_from_map(map)?)),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("record `{id}` must be a JSON object of fields"))),
        })
        .collect()
}

fn value_json(value: &[u8]) -> Value {
    let hex: String = value.iter().map(|byte| format!("{byte:02x}")).collect();
    json!({
        "text": value.to_str_lossy(),
        "hex": hex,
        "uint": decode_be(value).map(|number| number.to_string()),
    })
}

fn optional_value_json(value: Option<&[u8]>) -> Value {
    value.map(value_json).unwrap_or(Value::Null)
}

fn row_json(row: &Row) -> Value {
    Value::Object(
        row.iter()
            .map(|(field, value)| (field.clone(), value_json(value)))
            .collect(),
    )
}

fn table_json(rows: &TableRows) -> Value {
    Value::Object(
        rows.iter()
            .map(|(id, row)| (id.clone(), row_json(row)))
            .collect(),
    )
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert(
        "message".to_string(),
        json!(err.message().map(str::to_string).unwrap_or_else(|| err.to_string())),
    );
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}
