//! Typed expression IR
//!
//! The checker lowers AST expressions into `ExprIr`: field references are
//! resolved to join paths, aggregate calls are classified, and every node
//! has been type-checked. The SQL generator renders `ExprIr` through a
//! `Dialect`, inlining dimension and measure definitions at reference sites.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::types::DataType;

/// A literal value as written in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    String(String),
    /// Whole number literal
    Integer(i64),
    /// Fractional number literal
    Float(f64),
    Boolean(bool),
    /// Date literal text, e.g. "2003-06-09"; formatting is dialect work
    Date(String),
    /// Timestamp literal text, e.g. "2003-06-09 12:00:00"
    Timestamp(String),
    Null,
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::String(_) => DataType::String,
            LiteralValue::Integer(_) | LiteralValue::Float(_) => DataType::Number,
            LiteralValue::Boolean(_) => DataType::Boolean,
            LiteralValue::Date(_) => DataType::Date,
            LiteralValue::Timestamp(_) => DataType::Timestamp,
            // NULL adapts to context; string is the neutral default
            LiteralValue::Null => DataType::String,
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Sort direction for order_by and window ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl Default for OrderDirection {
    fn default() -> Self {
        OrderDirection::Asc
    }
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

// ============================================================================
// Aggregate functions
// ============================================================================

/// Aggregate functions measures can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    /// The data type of the aggregate result given its operand type.
    pub fn result_type(&self, operand: Option<DataType>) -> DataType {
        match self {
            AggFunc::Count | AggFunc::CountDistinct => DataType::Number,
            AggFunc::Sum | AggFunc::Avg => DataType::Number,
            AggFunc::Min | AggFunc::Max => operand.unwrap_or(DataType::Number),
        }
    }

    /// Whether the function needs an operand expression (`count()` does not)
    pub fn requires_operand(&self) -> bool {
        !matches!(self, AggFunc::Count)
    }

    /// Whether the operand must be numeric
    pub fn requires_numeric(&self) -> bool {
        matches!(self, AggFunc::Sum | AggFunc::Avg)
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunc::Count => write!(f, "count"),
            AggFunc::CountDistinct => write!(f, "count_distinct"),
            AggFunc::Sum => write!(f, "sum"),
            AggFunc::Avg => write!(f, "avg"),
            AggFunc::Min => write!(f, "min"),
            AggFunc::Max => write!(f, "max"),
        }
    }
}

/// Error when parsing an aggregate function name
#[derive(Debug, Clone)]
pub struct ParseAggFuncError {
    pub input: String,
}

impl fmt::Display for ParseAggFuncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown aggregate '{}'. Valid options: count, count_distinct, sum, avg, min, max",
            self.input
        )
    }
}

impl std::error::Error for ParseAggFuncError {}

impl FromStr for AggFunc {
    type Err = ParseAggFuncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" => Ok(AggFunc::Count),
            "count_distinct" | "countdistinct" => Ok(AggFunc::CountDistinct),
            "sum" => Ok(AggFunc::Sum),
            "avg" | "average" => Ok(AggFunc::Avg),
            "min" | "minimum" => Ok(AggFunc::Min),
            "max" | "maximum" => Ok(AggFunc::Max),
            _ => Err(ParseAggFuncError {
                input: s.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for AggFunc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        AggFunc::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for AggFunc {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

// ============================================================================
// IR nodes
// ============================================================================

/// A type-checked, name-resolved expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprIr {
    /// Reference into the stage input struct; `path` walks joins, the last
    /// segment is the field name
    Field { path: Vec<String> },
    /// Reference to an output field of the current stage (having/order_by)
    StageField { name: String },
    /// A physical column of the owning relation, by its column name.
    /// Minted when a rename detaches a field's public name from its column.
    Column(String),
    Literal(LiteralValue),
    Binary {
        op: BinaryOp,
        left: Box<ExprIr>,
        right: Box<ExprIr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprIr>,
    },
    /// Scalar function call; the name is generic and dialect-mapped at emit
    Call { func: String, args: Vec<ExprIr> },
    Aggregate {
        func: AggFunc,
        operand: Option<Box<ExprIr>>,
        /// Escapes grouping when set (the `all(...)` form)
        ungrouped: bool,
    },
    Window {
        func: String,
        args: Vec<ExprIr>,
        partition_by: Vec<ExprIr>,
        order_by: Vec<(ExprIr, OrderDirection)>,
    },
    Case {
        branches: Vec<(ExprIr, ExprIr)>,
        else_expr: Option<Box<ExprIr>>,
    },
    Cast {
        operand: Box<ExprIr>,
        to: DataType,
    },
}

impl ExprIr {
    /// Rewrite field references whose head segment is `from` to use `to`.
    /// Applied to sibling definitions when a rename changes a field's
    /// public name.
    pub fn rename_head(&mut self, from: &str, to: &str) {
        match self {
            ExprIr::Field { path } => {
                if path.first().map(|s| s == from).unwrap_or(false) {
                    path[0] = to.to_string();
                }
            }
            ExprIr::StageField { .. } | ExprIr::Column(_) | ExprIr::Literal(_) => {}
            ExprIr::Binary { left, right, .. } => {
                left.rename_head(from, to);
                right.rename_head(from, to);
            }
            ExprIr::Unary { operand, .. } => operand.rename_head(from, to),
            ExprIr::Call { args, .. } => {
                for a in args {
                    a.rename_head(from, to);
                }
            }
            ExprIr::Aggregate { operand, .. } => {
                if let Some(op) = operand {
                    op.rename_head(from, to);
                }
            }
            ExprIr::Window {
                args,
                partition_by,
                order_by,
                ..
            } => {
                for a in args.iter_mut().chain(partition_by.iter_mut()) {
                    a.rename_head(from, to);
                }
                for (e, _) in order_by {
                    e.rename_head(from, to);
                }
            }
            ExprIr::Case {
                branches,
                else_expr,
            } => {
                for (c, v) in branches {
                    c.rename_head(from, to);
                    v.rename_head(from, to);
                }
                if let Some(e) = else_expr {
                    e.rename_head(from, to);
                }
            }
            ExprIr::Cast { operand, .. } => operand.rename_head(from, to),
        }
    }
}
