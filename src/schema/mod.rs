//! External schema types and the contracts connectors must satisfy
//!
//! The core never performs I/O. Table shapes arrive through the translation
//! driver's needs protocol: the driver reports missing `TableRef`s, the
//! orchestrator fetches them from a live connection (the `SchemaProvider`
//! contract) and feeds them back. Fixtures for tests are YAML documents
//! loaded with `load_schemas_file`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::model::types::DataType;

/// A reference to a physical table on a named connection
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Connection name; empty means the default connection
    #[serde(default)]
    pub connection: String,
    pub table: String,
}

impl TableRef {
    pub fn new(connection: impl Into<String>, table: impl Into<String>) -> Self {
        TableRef {
            connection: connection.into(),
            table: table.into(),
        }
    }

    /// Parse "connection:table" or a bare table name
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((conn, table)) => TableRef::new(conn, table),
            None => TableRef::new("", s),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.connection.is_empty() {
            write!(f, "{}", self.table)
        } else {
            write!(f, "{}:{}", self.connection, self.table)
        }
    }
}

/// One column of a physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl ColumnShape {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnShape {
            name: name.into(),
            data_type,
        }
    }
}

/// The fetched shape of a physical table or query result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowShape {
    pub columns: Vec<ColumnShape>,
}

impl RowShape {
    pub fn new(columns: Vec<ColumnShape>) -> Self {
        RowShape { columns }
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.name == name)
    }
}

// ============================================================================
// Provider contracts (implemented by connectors, consumed by orchestrators)
// ============================================================================

/// Result of a schema fetch: shapes for the tables that resolved, error
/// text for the ones that did not.
#[derive(Debug, Clone, Default)]
pub struct SchemaFetch {
    pub schemas: BTreeMap<TableRef, RowShape>,
    pub errors: BTreeMap<TableRef, String>,
}

/// The contract a database connector satisfies so an orchestrator can
/// answer a translator's schema needs. Invoked only in response to a
/// needs-schema state; the core itself never calls it.
pub trait SchemaProvider {
    fn fetch_schema(&self, names: &[TableRef]) -> SchemaFetch;
}

/// Resolves a document reference (import target) to source text. The core
/// treats documents as opaque text keyed by a logical URL; parsing the text
/// back into a `Document` is the orchestrator's job.
pub trait DocumentReader {
    fn read_document(&self, url: &str) -> Result<String, String>;
}

// ============================================================================
// Schema store (driver-owned accumulation of fetched shapes)
// ============================================================================

/// Accumulates fetched table shapes and fetch failures across driver
/// update calls. BTreeMap keeps needs lists deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaStore {
    shapes: BTreeMap<TableRef, RowShape>,
    errors: BTreeMap<TableRef, String>,
}

impl SchemaStore {
    pub fn new() -> Self {
        SchemaStore::default()
    }

    pub fn insert(&mut self, table: TableRef, shape: RowShape) {
        self.errors.remove(&table);
        self.shapes.insert(table, shape);
    }

    pub fn insert_error(&mut self, table: TableRef, message: String) {
        self.errors.insert(table, message);
    }

    pub fn get(&self, table: &TableRef) -> Option<&RowShape> {
        self.shapes.get(table)
    }

    pub fn fetch_error(&self, table: &TableRef) -> Option<&str> {
        self.errors.get(table).map(|s| s.as_str())
    }

    /// A table is settled once we hold either its shape or a fetch error.
    pub fn is_settled(&self, table: &TableRef) -> bool {
        self.shapes.contains_key(table) || self.errors.contains_key(table)
    }
}

// ============================================================================
// YAML fixtures
// ============================================================================

/// Errors loading a schema fixture file
#[derive(Debug)]
pub enum SchemaError {
    /// IO error reading file
    Io {
        path: String,
        source: std::io::Error,
    },
    /// YAML deserialization error
    Yaml { source: serde_yaml::Error },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Io { path, source } => {
                write!(f, "Failed to read '{}': {}", path, source)
            }
            SchemaError::Yaml { source } => {
                write!(f, "Invalid YAML: {}", source)
            }
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaError::Io { source, .. } => Some(source),
            SchemaError::Yaml { source } => Some(source),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemasFile {
    tables: BTreeMap<String, Vec<ColumnShape>>,
}

/// Load table shapes from a YAML fixture: a `tables:` map of
/// "connection:table" keys to column lists.
pub fn load_schemas_file(path: impl AsRef<Path>) -> Result<BTreeMap<TableRef, RowShape>, SchemaError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_schemas_str(&text)
}

/// Parse table shapes from YAML text
pub fn load_schemas_str(text: &str) -> Result<BTreeMap<TableRef, RowShape>, SchemaError> {
    let file: SchemasFile =
        serde_yaml::from_str(text).map_err(|source| SchemaError::Yaml { source })?;
    Ok(file
        .tables
        .into_iter()
        .map(|(key, columns)| (TableRef::parse(&key), RowShape::new(columns)))
        .collect())
}
