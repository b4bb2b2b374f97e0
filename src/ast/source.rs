//! Source definition AST nodes

use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::query::StageAst;
use crate::diagnostics::SourceRange;
use crate::model::structdef::JoinKind;
use crate::schema::{ColumnShape, TableRef};

/// A named source declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub base: SourceBase,
    /// Dialect tag; absent means the registry default
    pub dialect: Option<String>,
    pub primary_key: Option<String>,
    /// Wildcard keep-list applied to inherited/base fields
    pub accept: Option<Vec<String>>,
    /// Wildcard drop-list applied to inherited/base fields
    pub except: Option<Vec<String>>,
    pub fields: Vec<FieldDecl>,
    pub range: SourceRange,
}

/// What a source is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceBase {
    /// A physical table; its shape comes from the schema store
    Table(TableRef),
    /// A SQL block with a declared result shape (shape resolution for SQL
    /// blocks needs a live connection, which is the orchestrator's job)
    Sql {
        connection: String,
        select: String,
        columns: Vec<ColumnShape>,
    },
    /// Extension of another source by name
    Extend(String),
    /// Prioritized list of interchangeable branch sources
    Composite(Vec<BranchDef>),
}

/// One branch of a composite source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDef {
    /// Name of the branch source
    pub source: String,
    /// Fields hidden from the branch's public set
    pub internal: Vec<String>,
    pub range: SourceRange,
}

impl BranchDef {
    pub fn new(source: impl Into<String>) -> Self {
        BranchDef {
            source: source.into(),
            internal: vec![],
            range: SourceRange::none(),
        }
    }

    pub fn with_internal<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.internal = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// A field declaration inside a source definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDecl {
    Dimension(ExprFieldDecl),
    Measure(ExprFieldDecl),
    Join(JoinDecl),
    /// A named sub-pipeline ("turtle")
    Turtle(TurtleDecl),
    Rename {
        to: String,
        from: String,
        range: SourceRange,
    },
}

impl FieldDecl {
    pub fn name(&self) -> &str {
        match self {
            FieldDecl::Dimension(d) | FieldDecl::Measure(d) => &d.name,
            FieldDecl::Join(j) => &j.name,
            FieldDecl::Turtle(t) => &t.name,
            FieldDecl::Rename { to, .. } => to,
        }
    }

    pub fn range(&self) -> SourceRange {
        match self {
            FieldDecl::Dimension(d) | FieldDecl::Measure(d) => d.range,
            FieldDecl::Join(j) => j.range,
            FieldDecl::Turtle(t) => t.range,
            FieldDecl::Rename { range, .. } => *range,
        }
    }
}

/// A dimension or measure declaration: `name is expr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprFieldDecl {
    pub name: String,
    pub expr: Expr,
    pub range: SourceRange,
}

/// A join declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinDecl {
    pub name: String,
    /// Name of the joined source
    pub source: String,
    pub kind: JoinKind,
    /// Full join condition (`on` form)
    pub on: Option<Expr>,
    /// Foreign-key expression (`with` form); requires the joined source to
    /// declare a primary key
    pub with: Option<Expr>,
    pub range: SourceRange,
}

/// A named sub-pipeline attached to a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurtleDecl {
    pub name: String,
    pub stages: Vec<StageAst>,
    pub range: SourceRange,
}

impl SourceDef {
    fn new(name: impl Into<String>, base: SourceBase) -> Self {
        SourceDef {
            name: name.into(),
            base,
            dialect: None,
            primary_key: None,
            accept: None,
            except: None,
            fields: vec![],
            range: SourceRange::none(),
        }
    }

    /// A source over a physical table
    pub fn from_table(name: impl Into<String>, table: TableRef) -> Self {
        SourceDef::new(name, SourceBase::Table(table))
    }

    /// A source over a SQL block with a declared shape
    pub fn from_sql(
        name: impl Into<String>,
        connection: impl Into<String>,
        select: impl Into<String>,
        columns: Vec<ColumnShape>,
    ) -> Self {
        SourceDef::new(
            name,
            SourceBase::Sql {
                connection: connection.into(),
                select: select.into(),
                columns,
            },
        )
    }

    /// A source extending another source
    pub fn extends(name: impl Into<String>, parent: impl Into<String>) -> Self {
        SourceDef::new(name, SourceBase::Extend(parent.into()))
    }

    /// A composite source over prioritized branches
    pub fn composite(name: impl Into<String>, branches: Vec<BranchDef>) -> Self {
        SourceDef::new(name, SourceBase::Composite(branches))
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_dialect(mut self, tag: impl Into<String>) -> Self {
        self.dialect = Some(tag.into());
        self
    }

    pub fn with_primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    pub fn with_accept<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.accept = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_except<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.except = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dimension(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.fields.push(FieldDecl::Dimension(ExprFieldDecl {
            name: name.into(),
            expr,
            range: SourceRange::none(),
        }));
        self
    }

    pub fn with_measure(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.fields.push(FieldDecl::Measure(ExprFieldDecl {
            name: name.into(),
            expr,
            range: SourceRange::none(),
        }));
        self
    }

    pub fn with_join(mut self, join: JoinDecl) -> Self {
        self.fields.push(FieldDecl::Join(join));
        self
    }

    /// `join_one: name is source with key`
    pub fn with_join_one_key(
        self,
        name: impl Into<String>,
        source: impl Into<String>,
        with: Expr,
    ) -> Self {
        self.with_join(JoinDecl {
            name: name.into(),
            source: source.into(),
            kind: JoinKind::One,
            on: None,
            with: Some(with),
            range: SourceRange::none(),
        })
    }

    /// `join_one: name is source on condition`
    pub fn with_join_one_on(
        self,
        name: impl Into<String>,
        source: impl Into<String>,
        on: Expr,
    ) -> Self {
        self.with_join(JoinDecl {
            name: name.into(),
            source: source.into(),
            kind: JoinKind::One,
            on: Some(on),
            with: None,
            range: SourceRange::none(),
        })
    }

    /// `join_many: name is source on condition`
    pub fn with_join_many(
        self,
        name: impl Into<String>,
        source: impl Into<String>,
        on: Expr,
    ) -> Self {
        self.with_join(JoinDecl {
            name: name.into(),
            source: source.into(),
            kind: JoinKind::Many,
            on: Some(on),
            with: None,
            range: SourceRange::none(),
        })
    }

    /// `join_cross: name is source`
    pub fn with_join_cross(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.with_join(JoinDecl {
            name: name.into(),
            source: source.into(),
            kind: JoinKind::Cross,
            on: None,
            with: None,
            range: SourceRange::none(),
        })
    }

    pub fn with_turtle(mut self, name: impl Into<String>, stages: Vec<StageAst>) -> Self {
        self.fields.push(FieldDecl::Turtle(TurtleDecl {
            name: name.into(),
            stages,
            range: SourceRange::none(),
        }));
        self
    }

    pub fn with_rename(mut self, to: impl Into<String>, from: impl Into<String>) -> Self {
        self.fields.push(FieldDecl::Rename {
            to: to.into(),
            from: from.into(),
            range: SourceRange::none(),
        });
        self
    }
}
