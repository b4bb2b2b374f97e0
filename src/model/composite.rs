//! Composite sources: prioritized lists of interchangeable branches
//!
//! A composite source defers the choice of an actual struct until query
//! time, when the fields a query touches are known. Branches are kept in
//! declaration order; the selector picks the first branch whose public
//! field set covers the query.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::structdef::StructDef;
use crate::diagnostics::SourceRange;

/// One candidate branch of a composite source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBranch {
    pub source: Arc<StructDef>,
    /// Field names visible to queries against the composite
    pub public_fields: Vec<String>,
}

impl CompositeBranch {
    pub fn new(source: Arc<StructDef>, internal: &[String]) -> Self {
        let public_fields = source
            .fields
            .iter()
            .map(|f| f.name().to_string())
            .filter(|name| !internal.contains(name))
            .collect();
        CompositeBranch {
            source,
            public_fields,
        }
    }

    pub fn exposes(&self, field: &str) -> bool {
        self.public_fields.iter().any(|f| f == field)
    }
}

/// A source defined as an ordered list of interchangeable branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSource {
    pub name: String,
    pub dialect: String,
    /// Declaration order; the selector's tie-break
    pub branches: Vec<CompositeBranch>,
    pub range: SourceRange,
}

impl CompositeSource {
    /// True if some branch exposes the field publicly
    pub fn any_branch_exposes(&self, field: &str) -> bool {
        self.branches.iter().any(|b| b.exposes(field))
    }
}
