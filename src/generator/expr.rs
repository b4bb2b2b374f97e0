//! Expression rendering
//!
//! Renders typed IR to SQL text through a dialect. Field references are
//! resolved against the stage input: physical columns render as
//! alias-qualified identifiers, declared dimensions and measures inline
//! their definitions at the reference site. Join paths encountered along
//! the way are recorded so the stage assembler knows which joins to emit.

use std::collections::BTreeSet;

use crate::dialect::Dialect;
use crate::model::expr::{AggFunc, BinaryOp, ExprIr, LiteralValue};
use crate::model::structdef::{FieldDef, StructDef};

use super::error::GenerateError;

/// SQL interval unit of a duration constructor, if the call is one
fn duration_unit(func: &str) -> Option<&'static str> {
    match func {
        "seconds" => Some("SECOND"),
        "minutes" => Some("MINUTE"),
        "hours" => Some("HOUR"),
        "days" => Some("DAY"),
        "weeks" => Some("WEEK"),
        "months" => Some("MONTH"),
        "quarters" => Some("QUARTER"),
        "years" => Some("YEAR"),
        _ => None,
    }
}

pub struct ExprRenderer<'a> {
    pub input: &'a StructDef,
    pub base_alias: &'a str,
    pub dialect: &'a dyn Dialect,
    /// Output columns of the enclosing stage, for having-clause references
    pub stage_items: Vec<(String, ExprIr)>,
    /// Join paths the rendered expressions walked, in deterministic order
    pub used_joins: BTreeSet<Vec<String>>,
}

impl<'a> ExprRenderer<'a> {
    pub fn new(input: &'a StructDef, base_alias: &'a str, dialect: &'a dyn Dialect) -> Self {
        ExprRenderer {
            input,
            base_alias,
            dialect,
            stage_items: vec![],
            used_joins: BTreeSet::new(),
        }
    }

    pub fn render(&mut self, ir: &ExprIr) -> Result<String, GenerateError> {
        self.render_prefixed(ir, &[])
    }

    /// The SQL alias a join path's rows are visible under
    pub fn join_alias(&self, path: &[String]) -> String {
        if path.is_empty() {
            self.base_alias.to_string()
        } else {
            path.join("_")
        }
    }

    /// Render an expression whose field paths are relative to the struct
    /// reached through `prefix` (empty for the stage input itself). Join
    /// conditions use this with the owning source's path as the prefix.
    pub fn render_prefixed(&mut self, ir: &ExprIr, prefix: &[String]) -> Result<String, GenerateError> {
        match ir {
            ExprIr::Field { path } => self.render_field(prefix, path),

            ExprIr::StageField { name } => {
                let item = self
                    .stage_items
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, ir)| ir.clone());
                match item {
                    Some(ir) => self.render_prefixed(&ir, &[]),
                    None => Err(GenerateError::UnknownField {
                        path: name.clone(),
                        input: self.input.name.clone(),
                    }),
                }
            }

            // A renamed physical field reads its original column
            ExprIr::Column(name) => Ok(format!(
                "{}.{}",
                self.dialect.quote_identifier(&self.join_alias(prefix)),
                self.dialect.quote_identifier(name)
            )),

            ExprIr::Literal(value) => Ok(self.render_literal(value)),

            ExprIr::Binary { op, left, right } => {
                // Temporal arithmetic with a duration constructor becomes an
                // INTERVAL expression
                if matches!(op, BinaryOp::Add | BinaryOp::Subtract) {
                    if let ExprIr::Call { func, args } = right.as_ref() {
                        if let (Some(unit), [ExprIr::Literal(LiteralValue::Integer(n))]) =
                            (duration_unit(func), args.as_slice())
                        {
                            let lhs = self.render_prefixed(left, prefix)?;
                            return Ok(format!(
                                "({} {} INTERVAL '{}' {})",
                                lhs,
                                op.as_str(),
                                n,
                                unit
                            ));
                        }
                    }
                }
                let lhs = self.render_prefixed(left, prefix)?;
                let rhs = self.render_prefixed(right, prefix)?;
                Ok(format!("({} {} {})", lhs, op.as_str(), rhs))
            }

            ExprIr::Unary { op, operand } => {
                let inner = self.render_prefixed(operand, prefix)?;
                Ok(match op {
                    crate::model::expr::UnaryOp::Not => format!("(NOT {})", inner),
                    crate::model::expr::UnaryOp::Negate => format!("(-{})", inner),
                })
            }

            ExprIr::Call { func, args } => {
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| self.render_prefixed(a, prefix))
                    .collect::<Result<_, _>>()?;
                Ok(format!(
                    "{}({})",
                    self.dialect.function_name(func),
                    rendered.join(", ")
                ))
            }

            ExprIr::Aggregate {
                func,
                operand,
                ungrouped,
            } => {
                let body = match (func, operand) {
                    (AggFunc::Count, None) => "COUNT(*)".to_string(),
                    (AggFunc::CountDistinct, Some(op)) => {
                        format!("COUNT(DISTINCT {})", self.render_prefixed(op, prefix)?)
                    }
                    (func, Some(op)) => {
                        let name = match func {
                            AggFunc::Count => "COUNT",
                            AggFunc::CountDistinct => unreachable!("handled above"),
                            AggFunc::Sum => "SUM",
                            AggFunc::Avg => "AVG",
                            AggFunc::Min => "MIN",
                            AggFunc::Max => "MAX",
                        };
                        format!("{}({})", name, self.render_prefixed(op, prefix)?)
                    }
                    (func, None) => format!("{}(*)", func.to_string().to_uppercase()),
                };
                if *ungrouped {
                    // all(...) escapes the surrounding grouping
                    Ok(format!("{} OVER ()", body))
                } else {
                    Ok(body)
                }
            }

            ExprIr::Window {
                func,
                args,
                partition_by,
                order_by,
            } => {
                let rendered_args: Vec<String> = args
                    .iter()
                    .map(|a| self.render_prefixed(a, prefix))
                    .collect::<Result<_, _>>()?;
                let mut over = vec![];
                if !partition_by.is_empty() {
                    let parts: Vec<String> = partition_by
                        .iter()
                        .map(|p| self.render_prefixed(p, prefix))
                        .collect::<Result<_, _>>()?;
                    over.push(format!("PARTITION BY {}", parts.join(", ")));
                }
                if !order_by.is_empty() {
                    let mut orders = vec![];
                    for (expr, direction) in order_by {
                        orders.push(format!(
                            "{} {}",
                            self.render_prefixed(expr, prefix)?,
                            direction.as_sql()
                        ));
                    }
                    over.push(format!("ORDER BY {}", orders.join(", ")));
                }
                Ok(format!(
                    "{}({}) OVER ({})",
                    self.dialect.function_name(func),
                    rendered_args.join(", "),
                    over.join(" ")
                ))
            }

            ExprIr::Case {
                branches,
                else_expr,
            } => {
                let mut sql = "CASE".to_string();
                for (condition, value) in branches {
                    sql.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.render_prefixed(condition, prefix)?,
                        self.render_prefixed(value, prefix)?
                    ));
                }
                if let Some(else_expr) = else_expr {
                    sql.push_str(&format!(" ELSE {}", self.render_prefixed(else_expr, prefix)?));
                }
                sql.push_str(" END");
                Ok(sql)
            }

            ExprIr::Cast { operand, to } => {
                let inner = self.render_prefixed(operand, prefix)?;
                Ok(self.dialect.sql_cast(&inner, to))
            }
        }
    }

    fn render_literal(&self, value: &LiteralValue) -> String {
        match value {
            LiteralValue::String(s) => self.dialect.sql_string_literal(s),
            LiteralValue::Integer(i) => self.dialect.sql_integer_literal(*i),
            LiteralValue::Float(x) => self.dialect.sql_float_literal(*x),
            LiteralValue::Boolean(b) => self.dialect.sql_boolean_literal(*b),
            LiteralValue::Date(d) => self.dialect.sql_date_literal(d),
            LiteralValue::Timestamp(t) => self.dialect.sql_timestamp_literal(t),
            LiteralValue::Null => "NULL".to_string(),
        }
    }

    /// Resolve a field path and render it: physical columns as qualified
    /// identifiers, declared fields by inlining their definitions under
    /// the path's join prefix.
    fn render_field(&mut self, prefix: &[String], path: &[String]) -> Result<String, GenerateError> {
        let full: Vec<String> = prefix.iter().chain(path.iter()).cloned().collect();
        let unknown = || GenerateError::UnknownField {
            path: full.join("."),
            input: self.input.name.clone(),
        };

        let (join_path, terminal) = match full.split_last() {
            Some((terminal, join_path)) => (join_path.to_vec(), terminal.clone()),
            None => return Err(unknown()),
        };

        // Record every join along the path so the FROM clause includes it
        for depth in 1..=join_path.len() {
            self.used_joins.insert(join_path[..depth].to_vec());
        }

        let mut current = self.input;
        for segment in &join_path {
            match current.get_field(segment) {
                Some(FieldDef::Join(join)) => current = &join.source,
                _ => return Err(unknown()),
            }
        }

        match current.get_field(&terminal) {
            Some(FieldDef::Dimension(field)) | Some(FieldDef::Measure(field)) => {
                match &field.expr {
                    Some(expr) => {
                        let expr = expr.clone();
                        self.render_prefixed(&expr, &join_path)
                    }
                    None => Ok(format!(
                        "{}.{}",
                        self.dialect.quote_identifier(&self.join_alias(&join_path)),
                        self.dialect.quote_identifier(&terminal)
                    )),
                }
            }
            // Joins, views, and repeated columns are not scalar values
            Some(_) | None => Err(unknown()),
        }
    }
}
