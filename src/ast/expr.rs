//! Expression AST nodes

use serde::{Deserialize, Serialize};

use crate::diagnostics::SourceRange;
use crate::model::expr::{BinaryOp, LiteralValue, OrderDirection, UnaryOp};
use crate::model::types::DataType;

/// An expression with its source range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
}

/// Expression kinds: a closed set so adding a kind is a compile-checked
/// change everywhere expressions are walked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(LiteralValue),
    /// Dotted field reference, e.g. `carriers.nickname` as ["carriers","nickname"]
    FieldRef(Vec<String>),
    /// Function call; aggregate names (count/sum/...) are classified by the
    /// checker. `ungrouped` marks the `all(...)` escape.
    Call {
        func: String,
        args: Vec<Expr>,
        ungrouped: bool,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// The pick/case form: ordered condition branches with optional default
    Case {
        branches: Vec<CaseBranch>,
        else_expr: Option<Box<Expr>>,
    },
    Cast {
        operand: Box<Expr>,
        to: DataType,
    },
    /// Window function with explicit partition/ordering context
    Window {
        func: String,
        args: Vec<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<WindowOrder>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub condition: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOrder {
    pub expr: Expr,
    pub direction: OrderDirection,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            kind,
            range: SourceRange::none(),
        }
    }

    pub fn with_range(mut self, range: SourceRange) -> Self {
        self.range = range;
        self
    }

    // -- literals -------------------------------------------------------------

    pub fn string(value: impl Into<String>) -> Self {
        Expr::new(ExprKind::Literal(LiteralValue::String(value.into())))
    }

    pub fn integer(value: i64) -> Self {
        Expr::new(ExprKind::Literal(LiteralValue::Integer(value)))
    }

    pub fn float(value: f64) -> Self {
        Expr::new(ExprKind::Literal(LiteralValue::Float(value)))
    }

    pub fn boolean(value: bool) -> Self {
        Expr::new(ExprKind::Literal(LiteralValue::Boolean(value)))
    }

    pub fn null() -> Self {
        Expr::new(ExprKind::Literal(LiteralValue::Null))
    }

    // -- references -----------------------------------------------------------

    /// Reference a field by dotted path segments
    pub fn field<S: Into<String>>(path: impl IntoIterator<Item = S>) -> Self {
        Expr::new(ExprKind::FieldRef(
            path.into_iter().map(Into::into).collect(),
        ))
    }

    // -- calls ----------------------------------------------------------------

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call {
            func: func.into(),
            args,
            ungrouped: false,
        })
    }

    /// `count()`
    pub fn count() -> Self {
        Expr::call("count", vec![])
    }

    pub fn sum(operand: Expr) -> Self {
        Expr::call("sum", vec![operand])
    }

    pub fn avg(operand: Expr) -> Self {
        Expr::call("avg", vec![operand])
    }

    pub fn min(operand: Expr) -> Self {
        Expr::call("min", vec![operand])
    }

    pub fn max(operand: Expr) -> Self {
        Expr::call("max", vec![operand])
    }

    pub fn count_distinct(operand: Expr) -> Self {
        Expr::call("count_distinct", vec![operand])
    }

    /// The `all(...)` ungrouping escape around an aggregate call
    pub fn ungrouped(mut self) -> Self {
        if let ExprKind::Call { ungrouped, .. } = &mut self.kind {
            *ungrouped = true;
        }
        self
    }

    // -- operators ------------------------------------------------------------

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Add, self, rhs)
    }

    pub fn subtract(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Subtract, self, rhs)
    }

    pub fn multiply(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Multiply, self, rhs)
    }

    pub fn divide(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Divide, self, rhs)
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Or, self, rhs)
    }

    pub fn not(self) -> Self {
        Expr::new(ExprKind::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        })
    }

    pub fn negate(self) -> Self {
        Expr::new(ExprKind::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        })
    }

    // -- structured forms -----------------------------------------------------

    pub fn case(branches: Vec<CaseBranch>, else_expr: Option<Expr>) -> Self {
        Expr::new(ExprKind::Case {
            branches,
            else_expr: else_expr.map(Box::new),
        })
    }

    pub fn cast(self, to: DataType) -> Self {
        Expr::new(ExprKind::Cast {
            operand: Box::new(self),
            to,
        })
    }

    pub fn window(
        func: impl Into<String>,
        args: Vec<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<WindowOrder>,
    ) -> Self {
        Expr::new(ExprKind::Window {
            func: func.into(),
            args,
            partition_by,
            order_by,
        })
    }

    /// The unqualified head name of a field reference, if this is one.
    /// Used for composite required-field collection and name defaulting.
    pub fn field_head(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::FieldRef(path) => path.first().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Collect the head names of every field reference in this expression,
    /// in first-reference order without duplicates.
    pub fn collect_field_heads<'a>(&'a self, out: &mut Vec<&'a str>) {
        let mut push = |name: &'a str| {
            if !out.contains(&name) {
                out.push(name);
            }
        };
        match &self.kind {
            ExprKind::Literal(_) => {}
            ExprKind::FieldRef(path) => {
                if let Some(head) = path.first() {
                    push(head);
                }
            }
            ExprKind::Call { args, .. } => {
                for a in args {
                    a.collect_field_heads(out);
                }
            }
            ExprKind::Binary { left, right, .. } => {
                left.collect_field_heads(out);
                right.collect_field_heads(out);
            }
            ExprKind::Unary { operand, .. } => operand.collect_field_heads(out),
            ExprKind::Case {
                branches,
                else_expr,
            } => {
                for b in branches {
                    b.condition.collect_field_heads(out);
                    b.value.collect_field_heads(out);
                }
                if let Some(e) = else_expr {
                    e.collect_field_heads(out);
                }
            }
            ExprKind::Cast { operand, .. } => operand.collect_field_heads(out),
            ExprKind::Window {
                args,
                partition_by,
                order_by,
                ..
            } => {
                for a in args.iter().chain(partition_by.iter()) {
                    a.collect_field_heads(out);
                }
                for o in order_by {
                    o.expr.collect_field_heads(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_shapes() {
        let e = Expr::field(["carriers", "nickname"]);
        assert_eq!(
            e.kind,
            ExprKind::FieldRef(vec!["carriers".to_string(), "nickname".to_string()])
        );

        let c = Expr::count();
        assert!(matches!(&c.kind, ExprKind::Call { func, args, ungrouped }
            if func == "count" && args.is_empty() && !ungrouped));

        let u = Expr::sum(Expr::field(["distance"])).ungrouped();
        assert!(matches!(&u.kind, ExprKind::Call { ungrouped: true, .. }));
    }

    #[test]
    fn test_collect_field_heads_dedups() {
        let e = Expr::field(["a"]).add(Expr::field(["a"]).multiply(Expr::field(["b", "c"])));
        let mut heads = Vec::new();
        e.collect_field_heads(&mut heads);
        assert_eq!(heads, vec!["a", "b"]);
    }
}
