//! Query pipeline AST nodes

use serde::{Deserialize, Serialize};

use super::expr::{Expr, ExprKind};
use crate::diagnostics::SourceRange;
use crate::model::expr::OrderDirection;

/// A named query: a pipeline of stages run against a source, optionally
/// refining a previously defined query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDef {
    pub name: String,
    /// Name of the input source (ignored when refining; the refined query's
    /// source is used)
    pub source: String,
    /// Name of an earlier query this one refines
    pub refines: Option<String>,
    pub stages: Vec<StageAst>,
    pub range: SourceRange,
}

impl QueryDef {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        QueryDef {
            name: name.into(),
            source: source.into(),
            refines: None,
            stages: vec![],
            range: SourceRange::none(),
        }
    }

    /// A query refining an earlier query by name
    pub fn refining(name: impl Into<String>, refines: impl Into<String>) -> Self {
        QueryDef {
            name: name.into(),
            source: String::new(),
            refines: Some(refines.into()),
            stages: vec![],
            range: SourceRange::none(),
        }
    }

    pub fn with_stage(mut self, stage: StageAst) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }
}

/// One pipeline stage: an ordered set of operations
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageAst {
    pub ops: Vec<OpAst>,
    pub range: SourceRange,
}

impl StageAst {
    pub fn new() -> Self {
        StageAst::default()
    }

    pub fn group_by(mut self, items: Vec<QueryItem>) -> Self {
        self.ops.push(OpAst::GroupBy(items));
        self
    }

    pub fn aggregate(mut self, items: Vec<QueryItem>) -> Self {
        self.ops.push(OpAst::Aggregate(items));
        self
    }

    pub fn project(mut self, items: Vec<QueryItem>) -> Self {
        self.ops.push(OpAst::Project(items));
        self
    }

    pub fn nest(mut self, nests: Vec<NestDecl>) -> Self {
        self.ops.push(OpAst::Nest(nests));
        self
    }

    pub fn where_(mut self, condition: Expr) -> Self {
        self.ops.push(OpAst::Where(condition));
        self
    }

    pub fn having(mut self, condition: Expr) -> Self {
        self.ops.push(OpAst::Having(condition));
        self
    }

    pub fn order_by(mut self, specs: Vec<OrderBySpec>) -> Self {
        self.ops.push(OpAst::OrderBy(specs));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.ops.push(OpAst::Limit(n));
        self
    }

    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.ops.push(OpAst::Index(spec));
        self
    }
}

/// One operation inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpAst {
    GroupBy(Vec<QueryItem>),
    Aggregate(Vec<QueryItem>),
    Project(Vec<QueryItem>),
    Nest(Vec<NestDecl>),
    Where(Expr),
    Having(Expr),
    OrderBy(Vec<OrderBySpec>),
    Limit(u64),
    Index(IndexSpec),
}

/// One output item of group_by/aggregate/project: an expression with an
/// optional explicit name (`name is expr`). Bare field references default
/// their name to the reference's last segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    pub name: Option<String>,
    pub expr: Expr,
    pub range: SourceRange,
}

impl QueryItem {
    /// A bare field reference item: `group_by: carrier`
    pub fn field<S: Into<String>>(path: impl IntoIterator<Item = S>) -> Self {
        QueryItem {
            name: None,
            expr: Expr::field(path),
            range: SourceRange::none(),
        }
    }

    /// A named item: `name is expr`
    pub fn named(name: impl Into<String>, expr: Expr) -> Self {
        QueryItem {
            name: Some(name.into()),
            expr,
            range: SourceRange::none(),
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    /// The output name: explicit name, or the last segment of a bare
    /// field reference.
    pub fn output_name(&self) -> Option<&str> {
        if let Some(name) = &self.name {
            return Some(name);
        }
        if let ExprKind::FieldRef(path) = &self.expr.kind {
            return path.last().map(|s| s.as_str());
        }
        None
    }
}

/// A nested sub-query declaration inside a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestDecl {
    pub name: String,
    /// Inline sub-pipeline; empty when referencing a turtle by name
    pub stages: Vec<StageAst>,
    /// Name of a source-level turtle to nest, when no inline stages given
    pub turtle: Option<String>,
    pub range: SourceRange,
}

impl NestDecl {
    pub fn inline(name: impl Into<String>, stages: Vec<StageAst>) -> Self {
        NestDecl {
            name: name.into(),
            stages,
            turtle: None,
            range: SourceRange::none(),
        }
    }

    /// Nest a turtle declared on the source: `nest: by_carrier`
    pub fn of_turtle(name: impl Into<String>) -> Self {
        let name = name.into();
        NestDecl {
            turtle: Some(name.clone()),
            name,
            stages: vec![],
            range: SourceRange::none(),
        }
    }
}

/// Key of an order_by entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderByKey {
    /// An output field name
    Name(String),
    /// A 1-based output column position
    Position(usize),
}

/// One order_by entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBySpec {
    pub key: OrderByKey,
    pub direction: OrderDirection,
    pub range: SourceRange,
}

impl OrderBySpec {
    pub fn asc(name: impl Into<String>) -> Self {
        OrderBySpec {
            key: OrderByKey::Name(name.into()),
            direction: OrderDirection::Asc,
            range: SourceRange::none(),
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        OrderBySpec {
            key: OrderByKey::Name(name.into()),
            direction: OrderDirection::Desc,
            range: SourceRange::none(),
        }
    }

    pub fn position(pos: usize, direction: OrderDirection) -> Self {
        OrderBySpec {
            key: OrderByKey::Position(pos),
            direction,
            range: SourceRange::none(),
        }
    }
}

/// An index stage: produces the fixed (field_name, field_value, weight)
/// schema over the listed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    /// Field whose sum weights each value; row count when absent
    pub weight: Option<String>,
    pub range: SourceRange,
}

impl IndexSpec {
    pub fn on<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        IndexSpec {
            fields: fields.into_iter().map(Into::into).collect(),
            weight: None,
            range: SourceRange::none(),
        }
    }

    pub fn weighted_by(mut self, field: impl Into<String>) -> Self {
        self.weight = Some(field.into());
        self
    }
}
