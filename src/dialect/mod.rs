//! Dialects: pluggable SQL syntax rules
//!
//! The generator never hardcodes a target engine's syntax. Identifier
//! quoting, literal formatting, function-name mapping, nested-type
//! aggregation, and flattening capability all go through the `Dialect`
//! trait. Dialects are supplied externally per source dialect tag; the
//! crate ships `StandardSqlDialect` as the reference implementation.

pub mod standard;

pub use standard::StandardSqlDialect;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::types::DataType;

/// Syntax rules of one target SQL engine
pub trait Dialect: Send + Sync {
    /// Tag this dialect registers under (e.g. "standard", "bigquery")
    fn name(&self) -> &str;

    /// Quote a single identifier
    fn quote_identifier(&self, id: &str) -> String;

    /// Render a table reference (connection-qualified names may drop the
    /// connection part; it routes the query, it is not SQL)
    fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn sql_string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn sql_integer_literal(&self, value: i64) -> String {
        value.to_string()
    }

    fn sql_float_literal(&self, value: f64) -> String {
        if value.fract() == 0.0 && value.is_finite() {
            format!("{:.1}", value)
        } else {
            format!("{}", value)
        }
    }

    fn sql_boolean_literal(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    fn sql_date_literal(&self, value: &str) -> String {
        format!("DATE '{}'", value)
    }

    fn sql_timestamp_literal(&self, value: &str) -> String {
        format!("TIMESTAMP '{}'", value)
    }

    /// Map a generic scalar function name to this engine's spelling
    fn function_name(&self, generic: &str) -> String;

    /// Render a cast
    fn sql_cast(&self, operand: &str, to: &DataType) -> String {
        format!("CAST({} AS {})", operand, self.type_name(to))
    }

    /// This engine's name for a data type
    fn type_name(&self, data_type: &DataType) -> String;

    /// Aggregate the named columns of a correlated subquery's rows into a
    /// repeated-record value. `alias` qualifies the columns.
    fn nest_aggregate(&self, alias: &str, columns: &[String]) -> String;
}

/// Registry mapping dialect tags to dialect objects, with an explicit
/// default for sources that carry no tag.
#[derive(Clone)]
pub struct DialectRegistry {
    default: Arc<dyn Dialect>,
    by_name: BTreeMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    pub fn with_default(default: Arc<dyn Dialect>) -> Self {
        let mut by_name = BTreeMap::new();
        by_name.insert(default.name().to_string(), default.clone());
        DialectRegistry { default, by_name }
    }

    /// Registry with `StandardSqlDialect` as the default
    pub fn standard() -> Self {
        DialectRegistry::with_default(Arc::new(StandardSqlDialect::new()))
    }

    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.by_name.insert(dialect.name().to_string(), dialect);
    }

    /// Look up by tag; unknown tags fall back to the default
    pub fn get(&self, tag: &str) -> &Arc<dyn Dialect> {
        self.by_name.get(tag).unwrap_or(&self.default)
    }

    pub fn default_dialect(&self) -> &Arc<dyn Dialect> {
        &self.default
    }

    pub fn default_tag(&self) -> &str {
        self.default.name()
    }
}

impl std::fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialectRegistry")
            .field("default", &self.default.name())
            .field("registered", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}
