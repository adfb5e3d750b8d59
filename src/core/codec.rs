//! Purpose: Map `(table, id, field)` triples onto backend addresses.
//! Exports: `Delimiter`, `Segment`, `FlatKeys`, `NestedPath`, identifier validation.
//! Role: Pure functions shared by both adapters; no engine access happens here.
//! Invariants: Identifiers are non-empty and never contain the delimiter.
//! Invariants: Flat prefixes always end on a delimiter boundary, so table `a` never
//! matches keys of table `ab`.

use std::fmt;

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_DELIMITER: char = '`';

/// Bucket holding ungrouped keys on the hierarchical backend. Reserved on both
/// backends so that table names mean the same thing everywhere.
pub const ROOT_BUCKET: &str = "_root";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Delimiter(char);

impl Delimiter {
    pub fn new(ch: char) -> Self {
        Self(ch)
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self(DEFAULT_DELIMITER)
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Segment {
    Key,
    Table,
    Id,
    Field,
}

impl Segment {
    fn label(self) -> &'static str {
        match self {
            Segment::Key => "key",
            Segment::Table => "table name",
            Segment::Id => "record id",
            Segment::Field => "field name",
        }
    }
}

pub fn validate(delimiter: Delimiter, segment: Segment, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::new(ErrorKind::InvalidIdentifier)
            .with_message(format!("{} must not be empty", segment.label())));
    }
    if value.contains(delimiter.as_char()) {
        return Err(Error::new(ErrorKind::InvalidIdentifier)
            .with_message(format!(
                "{} `{value}` contains the delimiter `{delimiter}`",
                segment.label()
            ))
            .with_hint("Pick identifiers without the delimiter, or open the store with another one."));
    }
    if segment == Segment::Table && value == ROOT_BUCKET {
        return Err(Error::new(ErrorKind::InvalidIdentifier)
            .with_message(format!("table name `{ROOT_BUCKET}` is reserved")));
    }
    Ok(())
}

/// Validate a whole row before anything is written.
pub(crate) fn validate_row<'a>(
    delimiter: Delimiter,
    table: &str,
    id: &str,
    fields: impl IntoIterator<Item = &'a String>,
) -> Result<(), Error> {
    validate(delimiter, Segment::Table, table)?;
    validate(delimiter, Segment::Id, id)?;
    for field in fields {
        validate(delimiter, Segment::Field, field)?;
    }
    Ok(())
}

/// True when every identifier is well formed; reads use this to answer
/// "absent" without touching the engine.
pub(crate) fn is_valid(delimiter: Delimiter, parts: &[(Segment, &str)]) -> bool {
    parts
        .iter()
        .all(|(segment, value)| validate(delimiter, *segment, value).is_ok())
}

/// Flat layout: `table‖delim‖id‖delim‖field`.
#[derive(Clone, Copy, Debug)]
pub struct FlatKeys {
    delimiter: Delimiter,
}

impl FlatKeys {
    pub fn new(delimiter: Delimiter) -> Self {
        Self { delimiter }
    }

    pub fn delimiter(&self) -> Delimiter {
        self.delimiter
    }

    pub fn plain_key(&self, key: &str) -> Vec<u8> {
        key.as_bytes().to_vec()
    }

    pub fn table_prefix(&self, table: &str) -> Vec<u8> {
        let mut out = String::with_capacity(table.len() + 1);
        out.push_str(table);
        out.push(self.delimiter.as_char());
        out.into_bytes()
    }

    pub fn record_prefix(&self, table: &str, id: &str) -> Vec<u8> {
        let mut out = String::with_capacity(table.len() + id.len() + 2);
        out.push_str(table);
        out.push(self.delimiter.as_char());
        out.push_str(id);
        out.push(self.delimiter.as_char());
        out.into_bytes()
    }

    pub fn field_key(&self, table: &str, id: &str, field: &str) -> Vec<u8> {
        let mut out = self.record_prefix(table, id);
        out.extend_from_slice(field.as_bytes());
        out
    }

    /// Field name of a stored key, given the length of its record prefix.
    pub fn field_name<'k>(&self, key: &'k [u8], prefix_len: usize) -> Option<&'k str> {
        let rest = key.get(prefix_len..)?;
        std::str::from_utf8(rest).ok()
    }

    /// `(id, field)` of a stored key, given the length of its table prefix.
    pub fn split_record<'k>(&self, key: &'k [u8], prefix_len: usize) -> Option<(&'k str, &'k str)> {
        let rest = std::str::from_utf8(key.get(prefix_len..)?).ok()?;
        rest.split_once(self.delimiter.as_char())
    }
}

/// Hierarchical layout: bucket `table` → sub-bucket `id` → key `field`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NestedPath<'a> {
    pub table: &'a str,
    pub id: Option<&'a str>,
    pub field: Option<&'a str>,
}

impl<'a> NestedPath<'a> {
    pub fn table(table: &'a str) -> Self {
        Self {
            table,
            id: None,
            field: None,
        }
    }

    pub fn record(table: &'a str, id: &'a str) -> Self {
        Self {
            table,
            id: Some(id),
            field: None,
        }
    }

    pub fn field(table: &'a str, id: &'a str, field: &'a str) -> Self {
        Self {
            table,
            id: Some(id),
            field: Some(field),
        }
    }

    pub fn bucket(&self) -> Vec<u8> {
        self.table.as_bytes().to_vec()
    }

    pub fn sub_bucket(&self) -> Option<Vec<u8>> {
        self.id.map(|id| id.as_bytes().to_vec())
    }

    pub fn key(&self) -> Option<Vec<u8>> {
        self.field.map(|field| field.as_bytes().to_vec())
    }
}
