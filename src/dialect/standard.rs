//! The reference dialect: portable, ANSI-leaning SQL

use super::Dialect;
use crate::model::types::DataType;

/// Double-quoted identifiers, ARRAY_AGG(STRUCT(...)) nesting, flat
/// aggregates allowed.
#[derive(Debug, Default, Clone)]
pub struct StandardSqlDialect;

impl StandardSqlDialect {
    pub fn new() -> Self {
        StandardSqlDialect
    }
}

impl Dialect for StandardSqlDialect {
    fn name(&self) -> &str {
        "standard"
    }

    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id.replace('"', "\"\""))
    }

    fn function_name(&self, generic: &str) -> String {
        match generic {
            "concat" => "CONCAT".to_string(),
            "length" => "LENGTH".to_string(),
            "lower" => "LOWER".to_string(),
            "upper" => "UPPER".to_string(),
            "trim" => "TRIM".to_string(),
            "round" => "ROUND".to_string(),
            "floor" => "FLOOR".to_string(),
            "ceil" => "CEIL".to_string(),
            "abs" => "ABS".to_string(),
            "coalesce" => "COALESCE".to_string(),
            "now" => "CURRENT_TIMESTAMP".to_string(),
            other => other.to_uppercase(),
        }
    }

    fn type_name(&self, data_type: &DataType) -> String {
        match data_type {
            DataType::String => "VARCHAR",
            DataType::Number => "DOUBLE",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Boolean => "BOOLEAN",
            DataType::Record => "ROW",
            DataType::Array => "ARRAY",
        }
        .to_string()
    }

    fn nest_aggregate(&self, alias: &str, columns: &[String]) -> String {
        let fields: Vec<String> = columns
            .iter()
            .map(|c| format!("{}.{} AS {}", alias, self.quote_identifier(c), self.quote_identifier(c)))
            .collect();
        format!("ARRAY_AGG(STRUCT({}))", fields.join(", "))
    }
}
