// Open-time configuration: which engine, where, and how identifiers are delimited.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::codec::Delimiter;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageKind {
    /// Single ordered key space; tables are key prefixes.
    Flat,
    /// Nested buckets; tables and records are namespaces.
    Hierarchical,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Flat => "flat",
            StorageKind::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "flat" | "0" => Ok(StorageKind::Flat),
            "hierarchical" | "nested" | "1" => Ok(StorageKind::Hierarchical),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown storage kind `{other}`"))
                .with_hint("Use `flat` (0) or `hierarchical` (1).")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub kind: StorageKind,
    pub path: PathBuf,
    pub delimiter: Delimiter,
    pub in_memory: bool,
    pub password: Option<String>,
}

impl StoreOptions {
    pub fn new(kind: StorageKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            delimiter: Delimiter::default(),
            in_memory: false,
            password: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Delimiter::new(delimiter);
        self
    }

    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
