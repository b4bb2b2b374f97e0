//! Compiled query pipelines
//!
//! The pipeline compiler normalizes a query AST into these structures:
//! every item is type-checked, every name resolved, every stage's output
//! schema minted as a fresh `StructDef`. Stage N's output is stage N+1's
//! only visible input.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::diagnostics::SourceRange;
use crate::model::expr::{ExprIr, OrderDirection};
use crate::model::structdef::StructDef;
use crate::model::types::{DataType, TypeDesc};

/// The overall form of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// group_by and/or aggregate: a grouped query
    Reduce,
    /// project: row-by-row selection
    Project,
    /// index: the fixed (field_name, field_value, weight) shape
    Index,
}

/// Whether a stage compiled cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Resolved,
    Failed,
}

/// One compiled output item (a group_by, aggregate, or project entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledItem {
    pub name: String,
    pub ir: ExprIr,
    pub ty: TypeDesc,
    pub range: SourceRange,
}

/// A compiled nested sub-pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledNest {
    pub name: String,
    pub stages: Vec<CompiledStage>,
    pub range: SourceRange,
}

impl CompiledNest {
    pub fn output(&self) -> Option<&Arc<StructDef>> {
        self.stages.last().map(|s| &s.output)
    }
}

/// A resolved order_by entry: output column name and 1-based position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledOrderBy {
    pub name: String,
    pub position: usize,
    pub direction: OrderDirection,
}

/// One fully compiled stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStage {
    pub kind: StageKind,
    pub status: StageStatus,
    pub group_by: Vec<CompiledItem>,
    pub aggregates: Vec<CompiledItem>,
    pub projects: Vec<CompiledItem>,
    pub nests: Vec<CompiledNest>,
    /// Row filters, applied before aggregation
    pub wheres: Vec<ExprIr>,
    /// Group filters, applied after aggregation
    pub havings: Vec<ExprIr>,
    pub order_by: Vec<CompiledOrderBy>,
    pub limit: Option<u64>,
    /// Fields an index stage scans
    pub index_fields: Vec<String>,
    /// Weighting field of an index stage; row count when absent
    pub index_weight: Option<String>,
    pub input: Arc<StructDef>,
    pub output: Arc<StructDef>,
    pub range: SourceRange,
}

impl CompiledStage {
    pub fn is_resolved(&self) -> bool {
        self.status == StageStatus::Resolved
    }
}

/// A fully compiled query pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub name: String,
    /// The resolved input struct (composite branch already selected)
    pub input: Arc<StructDef>,
    pub stages: Vec<CompiledStage>,
    pub range: SourceRange,
}

impl CompiledQuery {
    /// The final stage's output struct
    pub fn output(&self) -> Option<&Arc<StructDef>> {
        self.stages.last().map(|s| &s.output)
    }

    /// The output row schema: field name to data type, in column order
    pub fn output_schema(&self) -> Vec<(String, DataType)> {
        self.output().map(|s| s.row_schema()).unwrap_or_default()
    }

    pub fn is_resolved(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(|s| s.is_resolved())
    }
}
