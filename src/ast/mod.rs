//! The parsed-input AST
//!
//! Parsing source text is an external concern: a parser hands the core a
//! `Document` whose nodes already carry source ranges. All node types
//! provide builder-style constructors (`with_*`) so orchestrators and tests
//! can assemble documents directly.

pub mod expr;
pub mod query;
pub mod source;

pub use expr::{CaseBranch, Expr, ExprKind, WindowOrder};
pub use query::{IndexSpec, NestDecl, OpAst, OrderByKey, OrderBySpec, QueryDef, QueryItem, StageAst};
pub use source::{BranchDef, ExprFieldDecl, FieldDecl, JoinDecl, SourceBase, SourceDef, TurtleDecl};

use serde::{Deserialize, Serialize};

use crate::diagnostics::SourceRange;

/// One top-level declaration in a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Pull another document's declarations into this namespace
    Import { url: String, range: SourceRange },
    Source(SourceDef),
    Query(QueryDef),
}

/// A parsed source document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    /// Logical URL of the document, when known
    pub url: Option<String>,
    pub statements: Vec<Statement>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_import(mut self, url: impl Into<String>) -> Self {
        self.statements.push(Statement::Import {
            url: url.into(),
            range: SourceRange::none(),
        });
        self
    }

    pub fn with_source(mut self, source: SourceDef) -> Self {
        self.statements.push(Statement::Source(source));
        self
    }

    pub fn with_query(mut self, query: QueryDef) -> Self {
        self.statements.push(Statement::Query(query));
        self
    }

    /// URLs of every import in declaration order
    pub fn import_urls(&self) -> Vec<&str> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Import { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }
}
