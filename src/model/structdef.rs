//! Resolved source definitions
//!
//! A `StructDef` is a named, typed row shape: a base (table, SQL block, or
//! a query-stage output), an ordered list of fields with unique names, and
//! a dialect tag. Built once by the struct/join builder; shared afterwards
//! via `Arc`, never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::expr::ExprIr;
use super::types::{DataType, TypeDesc};
use crate::ast::query::StageAst;
use crate::diagnostics::SourceRange;
use crate::schema::{RowShape, TableRef};

/// Relationship cardinality of a join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// At most one joined row per input row
    One,
    /// Any number of joined rows per input row
    Many,
    /// Full cross product
    Cross,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::One => write!(f, "one"),
            JoinKind::Many => write!(f, "many"),
            JoinKind::Cross => write!(f, "cross"),
        }
    }
}

/// What a resolved struct reads from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructBase {
    Table(TableRef),
    Sql { connection: String, select: String },
    /// Minted by the pipeline compiler for a stage's output columns
    QueryStage,
}

/// A dimension or measure field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprField {
    pub name: String,
    /// None for physical columns; Some for declared expressions
    pub expr: Option<ExprIr>,
    pub ty: TypeDesc,
    pub range: SourceRange,
}

/// A join field embedding another source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinField {
    pub name: String,
    pub source: Arc<StructDef>,
    pub kind: JoinKind,
    /// Full join condition, already type-checked
    pub on: Option<ExprIr>,
    /// Foreign-key expression for `with` joins
    pub with: Option<ExprIr>,
    pub range: SourceRange,
}

/// A named sub-pipeline, compiled lazily when a query nests it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurtleField {
    pub name: String,
    pub stages: Vec<StageAst>,
    pub range: SourceRange,
}

/// A repeated-record column in a query-stage output (a compiled nest)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatedField {
    pub name: String,
    pub shape: Arc<StructDef>,
    pub range: SourceRange,
}

/// One field of a struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDef {
    Dimension(ExprField),
    Measure(ExprField),
    Join(JoinField),
    Turtle(TurtleField),
    Repeated(RepeatedField),
}

impl FieldDef {
    pub fn name(&self) -> &str {
        match self {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => &f.name,
            FieldDef::Join(j) => &j.name,
            FieldDef::Turtle(t) => &t.name,
            FieldDef::Repeated(r) => &r.name,
        }
    }

    pub fn type_desc(&self) -> TypeDesc {
        match self {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => f.ty,
            FieldDef::Join(_) => TypeDesc::scalar(DataType::Record),
            FieldDef::Turtle(_) | FieldDef::Repeated(_) => TypeDesc::scalar(DataType::Array),
        }
    }

    pub fn range(&self) -> SourceRange {
        match self {
            FieldDef::Dimension(f) | FieldDef::Measure(f) => f.range,
            FieldDef::Join(j) => j.range,
            FieldDef::Turtle(t) => t.range,
            FieldDef::Repeated(r) => r.range,
        }
    }

    pub fn is_measure(&self) -> bool {
        matches!(self, FieldDef::Measure(_))
    }

    pub fn is_dimension(&self) -> bool {
        matches!(self, FieldDef::Dimension(_))
    }
}

/// A named, typed, queryable row shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub base: StructBase,
    pub dialect: String,
    pub primary_key: Option<String>,
    /// Ordered; names unique after wildcard expansion
    pub fields: Vec<FieldDef>,
}

impl StructDef {
    pub fn new(name: impl Into<String>, base: StructBase, dialect: impl Into<String>) -> Self {
        StructDef {
            name: name.into(),
            base,
            dialect: dialect.into(),
            primary_key: None,
            fields: vec![],
        }
    }

    /// Seed a struct's fields from a fetched table shape: each column
    /// becomes a physical dimension.
    pub fn from_row_shape(
        name: impl Into<String>,
        base: StructBase,
        dialect: impl Into<String>,
        shape: &RowShape,
    ) -> Self {
        let mut def = StructDef::new(name, base, dialect);
        for column in &shape.columns {
            def.fields.push(FieldDef::Dimension(ExprField {
                name: column.name.clone(),
                expr: None,
                ty: TypeDesc::scalar(column.data_type),
                range: SourceRange::none(),
            }));
        }
        def
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Add a field; false (and no change) if the name is already taken.
    pub fn add_field(&mut self, field: FieldDef) -> bool {
        if self.has_field(field.name()) {
            return false;
        }
        self.fields.push(field);
        true
    }

    pub fn joins(&self) -> impl Iterator<Item = &JoinField> {
        self.fields.iter().filter_map(|f| match f {
            FieldDef::Join(j) => Some(j),
            _ => None,
        })
    }

    /// The output row schema: (name, data type) per non-join field,
    /// in declaration order.
    pub fn row_schema(&self) -> Vec<(String, DataType)> {
        self.fields
            .iter()
            .filter(|f| !matches!(f, FieldDef::Join(_)))
            .map(|f| (f.name().to_string(), f.type_desc().data_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnShape;

    fn table_struct() -> StructDef {
        let shape = RowShape::new(vec![
            ColumnShape::new("carrier", DataType::String),
            ColumnShape::new("distance", DataType::Number),
        ]);
        StructDef::from_row_shape(
            "flights",
            StructBase::Table(TableRef::parse("duckdb:flights")),
            "standard",
            &shape,
        )
    }

    #[test]
    fn test_from_row_shape() {
        let s = table_struct();
        assert_eq!(s.fields.len(), 2);
        assert!(s.get_field("carrier").unwrap().is_dimension());
        assert_eq!(
            s.get_field("distance").unwrap().type_desc().data_type,
            DataType::Number
        );
    }

    #[test]
    fn test_add_field_rejects_duplicates() {
        let mut s = table_struct();
        let dup = FieldDef::Dimension(ExprField {
            name: "carrier".to_string(),
            expr: None,
            ty: TypeDesc::scalar(DataType::String),
            range: SourceRange::none(),
        });
        assert!(!s.add_field(dup));
        assert_eq!(s.fields.len(), 2);
    }

    #[test]
    fn test_row_schema_skips_joins() {
        let mut s = table_struct();
        let joined = Arc::new(StructDef::new(
            "carriers",
            StructBase::Table(TableRef::parse("carriers")),
            "standard",
        ));
        s.add_field(FieldDef::Join(JoinField {
            name: "carriers".to_string(),
            source: joined,
            kind: JoinKind::One,
            on: None,
            with: None,
            range: SourceRange::none(),
        }));
        let schema = s.row_schema();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema[0], ("carrier".to_string(), DataType::String));
    }
}
