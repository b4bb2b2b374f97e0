//! Expression type checking
//!
//! `check_expr` lowers an AST expression into typed IR by structural
//! recursion. Every node gets a `TypeDesc`; aggregate composition and
//! window ordering rules are enforced here, and the eval space of every
//! result is recorded for the generator's pushdown decisions.

use std::str::FromStr;

use crate::ast::expr::{Expr, ExprKind};
use crate::model::expr::{AggFunc, BinaryOp, ExprIr, LiteralValue, UnaryOp};
use crate::model::types::{DataType, EvalSpace, ExpressionType, TypeDesc};
use crate::resolver::{Resolved, Scope};

use super::error::TypeError;

/// A type-checked expression: resolved IR plus its descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub ir: ExprIr,
    pub ty: TypeDesc,
}

/// Scalar functions whose result type we know
fn scalar_result_type(func: &str, args: &[TypedExpr]) -> DataType {
    match func {
        "concat" | "lower" | "upper" | "trim" | "substr" => DataType::String,
        "length" | "round" | "floor" | "ceil" | "abs" => DataType::Number,
        "now" => DataType::Timestamp,
        "coalesce" => args
            .first()
            .map(|a| a.ty.data_type)
            .unwrap_or(DataType::String),
        // Unknown scalar functions echo their first argument's type
        _ => args
            .first()
            .map(|a| a.ty.data_type)
            .unwrap_or(DataType::String),
    }
}

/// Duration constructors usable in temporal arithmetic: `dep_time + days(1)`
fn is_duration_call(expr: &Expr) -> bool {
    matches!(
        &expr.kind,
        ExprKind::Call { func, .. }
            if matches!(
                func.as_str(),
                "seconds" | "minutes" | "hours" | "days" | "weeks" | "months" | "quarters" | "years"
            )
    )
}

/// Combine the expression kinds of operands: analytic dominates, then
/// aggregate, then scalar.
fn combine_expression_type(parts: &[TypedExpr]) -> ExpressionType {
    let mut combined = ExpressionType::Scalar;
    for p in parts {
        match p.ty.expression_type {
            ExpressionType::Analytic => return ExpressionType::Analytic,
            ExpressionType::Aggregate | ExpressionType::UngroupedAggregate => {
                combined = ExpressionType::Aggregate;
            }
            ExpressionType::Scalar => {}
        }
    }
    combined
}

fn combine_eval_space(parts: &[TypedExpr]) -> EvalSpace {
    parts
        .iter()
        .fold(EvalSpace::Constant, |acc, p| acc.merge(p.ty.eval_space))
}

/// Type-check an expression against a scope, producing typed IR.
pub fn check_expr(expr: &Expr, scope: &Scope<'_>) -> Result<TypedExpr, TypeError> {
    match &expr.kind {
        ExprKind::Literal(value) => Ok(TypedExpr {
            ty: TypeDesc::constant(value.data_type()),
            ir: ExprIr::Literal(value.clone()),
        }),

        ExprKind::FieldRef(path) => match scope.resolve(path, expr.range)? {
            Resolved::InputField { path, ty, .. } => Ok(TypedExpr {
                ir: ExprIr::Field { path },
                ty,
            }),
            Resolved::StageField { name, ty } => Ok(TypedExpr {
                ir: ExprIr::StageField { name },
                ty,
            }),
            Resolved::Query(q) => Err(TypeError::QueryAsValue {
                name: q.name.clone(),
                range: expr.range,
            }),
        },

        ExprKind::Call {
            func,
            args,
            ungrouped,
        } => {
            if let Ok(agg) = AggFunc::from_str(func) {
                check_aggregate_call(expr, agg, args, *ungrouped, scope)
            } else {
                check_scalar_call(func, args, scope)
            }
        }

        ExprKind::Binary { op, left, right } => check_binary(*op, left, right, scope),

        ExprKind::Unary { op, operand } => {
            let inner = check_expr(operand, scope)?;
            let (required, result) = match op {
                UnaryOp::Not => (DataType::Boolean, DataType::Boolean),
                UnaryOp::Negate => (DataType::Number, DataType::Number),
            };
            if inner.ty.data_type != required {
                return Err(TypeError::Mismatch {
                    expected: required,
                    found: inner.ty.data_type,
                    context: "Unary operand".to_string(),
                    range: operand.range,
                });
            }
            Ok(TypedExpr {
                ty: TypeDesc {
                    data_type: result,
                    expression_type: inner.ty.expression_type,
                    eval_space: inner.ty.eval_space,
                },
                ir: ExprIr::Unary {
                    op: *op,
                    operand: Box::new(inner.ir),
                },
            })
        }

        ExprKind::Case {
            branches,
            else_expr,
        } => {
            let mut checked: Vec<(TypedExpr, TypedExpr)> = Vec::with_capacity(branches.len());
            for branch in branches {
                let condition = check_expr(&branch.condition, scope)?;
                if condition.ty.data_type != DataType::Boolean {
                    return Err(TypeError::Mismatch {
                        expected: DataType::Boolean,
                        found: condition.ty.data_type,
                        context: "Pick condition".to_string(),
                        range: branch.condition.range,
                    });
                }
                let value = check_expr(&branch.value, scope)?;
                checked.push((condition, value));
            }
            let else_checked = else_expr
                .as_ref()
                .map(|e| check_expr(e, scope))
                .transpose()?;

            // All branch values must agree on data type
            let result_type = checked
                .first()
                .map(|(_, v)| v.ty.data_type)
                .or_else(|| else_checked.as_ref().map(|e| e.ty.data_type))
                .unwrap_or(DataType::String);
            for (i, (_, value)) in checked.iter().enumerate() {
                if value.ty.data_type != result_type {
                    return Err(TypeError::Mismatch {
                        expected: result_type,
                        found: value.ty.data_type,
                        context: "Pick value".to_string(),
                        range: branches[i].value.range,
                    });
                }
            }
            if let (Some(e), Some(ast)) = (&else_checked, else_expr.as_deref()) {
                if e.ty.data_type != result_type {
                    return Err(TypeError::Mismatch {
                        expected: result_type,
                        found: e.ty.data_type,
                        context: "Pick default".to_string(),
                        range: ast.range,
                    });
                }
            }

            let mut parts: Vec<TypedExpr> = Vec::new();
            for (c, v) in &checked {
                parts.push(c.clone());
                parts.push(v.clone());
            }
            if let Some(e) = &else_checked {
                parts.push(e.clone());
            }
            Ok(TypedExpr {
                ty: TypeDesc {
                    data_type: result_type,
                    expression_type: combine_expression_type(&parts),
                    eval_space: combine_eval_space(&parts),
                },
                ir: ExprIr::Case {
                    branches: checked.into_iter().map(|(c, v)| (c.ir, v.ir)).collect(),
                    else_expr: else_checked.map(|e| Box::new(e.ir)),
                },
            })
        }

        ExprKind::Cast { operand, to } => {
            let inner = check_expr(operand, scope)?;
            Ok(TypedExpr {
                ty: TypeDesc {
                    data_type: *to,
                    expression_type: inner.ty.expression_type,
                    eval_space: inner.ty.eval_space,
                },
                ir: ExprIr::Cast {
                    operand: Box::new(inner.ir),
                    to: *to,
                },
            })
        }

        ExprKind::Window {
            func,
            args,
            partition_by,
            order_by,
        } => {
            if order_by.is_empty() {
                return Err(TypeError::MissingWindowOrdering {
                    func: func.clone(),
                    range: expr.range,
                });
            }
            let checked_args: Vec<TypedExpr> = args
                .iter()
                .map(|a| check_expr(a, scope))
                .collect::<Result<_, _>>()?;
            let checked_partition: Vec<TypedExpr> = partition_by
                .iter()
                .map(|p| check_expr(p, scope))
                .collect::<Result<_, _>>()?;
            let checked_order: Vec<(TypedExpr, _)> = order_by
                .iter()
                .map(|o| check_expr(&o.expr, scope).map(|e| (e, o.direction)))
                .collect::<Result<_, _>>()?;

            let data_type = match func.as_str() {
                "rank" | "dense_rank" | "row_number" | "ntile" => DataType::Number,
                _ => checked_args
                    .first()
                    .map(|a| a.ty.data_type)
                    .unwrap_or(DataType::Number),
            };
            Ok(TypedExpr {
                ty: TypeDesc::analytic(data_type),
                ir: ExprIr::Window {
                    func: func.clone(),
                    args: checked_args.into_iter().map(|a| a.ir).collect(),
                    partition_by: checked_partition.into_iter().map(|p| p.ir).collect(),
                    order_by: checked_order.into_iter().map(|(e, d)| (e.ir, d)).collect(),
                },
            })
        }
    }
}

fn check_aggregate_call(
    expr: &Expr,
    func: AggFunc,
    args: &[Expr],
    ungrouped: bool,
    scope: &Scope<'_>,
) -> Result<TypedExpr, TypeError> {
    if func.requires_operand() && args.is_empty() {
        return Err(TypeError::Mismatch {
            expected: DataType::Number,
            found: DataType::String,
            context: format!("{} requires an operand", func),
            range: expr.range,
        });
    }

    let operand = args.first().map(|a| check_expr(a, scope)).transpose()?;

    if let Some(op) = &operand {
        // Aggregates take row-space operands; a nested aggregate is only
        // legal when explicitly ungrouped.
        match op.ty.expression_type {
            ExpressionType::Aggregate | ExpressionType::Analytic => {
                return Err(TypeError::IllegalAggregateNesting { range: expr.range });
            }
            ExpressionType::UngroupedAggregate | ExpressionType::Scalar => {}
        }
        if func.requires_numeric() && !op.ty.data_type.is_numeric() {
            return Err(TypeError::Mismatch {
                expected: DataType::Number,
                found: op.ty.data_type,
                context: format!("{} operand", func),
                range: args[0].range,
            });
        }
    }

    let operand_type = operand.as_ref().map(|o| o.ty.data_type);
    Ok(TypedExpr {
        ty: TypeDesc {
            data_type: func.result_type(operand_type),
            expression_type: if ungrouped {
                ExpressionType::UngroupedAggregate
            } else {
                ExpressionType::Aggregate
            },
            eval_space: EvalSpace::Output,
        },
        ir: ExprIr::Aggregate {
            func,
            operand: operand.map(|o| Box::new(o.ir)),
            ungrouped,
        },
    })
}

fn check_scalar_call(
    func: &str,
    args: &[Expr],
    scope: &Scope<'_>,
) -> Result<TypedExpr, TypeError> {
    let checked: Vec<TypedExpr> = args
        .iter()
        .map(|a| check_expr(a, scope))
        .collect::<Result<_, _>>()?;

    // String functions need string inputs; numeric functions numeric ones
    let required = match func {
        "lower" | "upper" | "trim" | "length" => Some(DataType::String),
        "round" | "floor" | "ceil" | "abs" => Some(DataType::Number),
        _ => None,
    };
    if let Some(required) = required {
        for (i, arg) in checked.iter().enumerate() {
            if arg.ty.data_type != required {
                return Err(TypeError::Mismatch {
                    expected: required,
                    found: arg.ty.data_type,
                    context: format!("{} argument", func),
                    range: args[i].range,
                });
            }
        }
    }

    Ok(TypedExpr {
        ty: TypeDesc {
            data_type: scalar_result_type(func, &checked),
            expression_type: combine_expression_type(&checked),
            eval_space: combine_eval_space(&checked),
        },
        ir: ExprIr::Call {
            func: func.to_string(),
            args: checked.into_iter().map(|a| a.ir).collect(),
        },
    })
}

fn check_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    scope: &Scope<'_>,
) -> Result<TypedExpr, TypeError> {
    let lhs = check_expr(left, scope)?;
    let rhs = check_expr(right, scope)?;

    let data_type = if op.is_arithmetic() {
        if lhs.ty.data_type.is_numeric() && rhs.ty.data_type.is_numeric() {
            DataType::Number
        } else if lhs.ty.data_type.is_temporal()
            && matches!(op, BinaryOp::Add | BinaryOp::Subtract)
            && is_duration_call(right)
        {
            // date/timestamp arithmetic with explicit units: d + days(3)
            lhs.ty.data_type
        } else if !lhs.ty.data_type.is_numeric() {
            return Err(TypeError::Mismatch {
                expected: DataType::Number,
                found: lhs.ty.data_type,
                context: format!("Left operand of '{}'", op.as_str()),
                range: left.range,
            });
        } else {
            return Err(TypeError::Mismatch {
                expected: DataType::Number,
                found: rhs.ty.data_type,
                context: format!("Right operand of '{}'", op.as_str()),
                range: right.range,
            });
        }
    } else if op.is_comparison() {
        let comparable = lhs.ty.data_type == rhs.ty.data_type
            || (lhs.ty.data_type.is_numeric() && rhs.ty.data_type.is_numeric())
            || (lhs.ty.data_type.is_temporal() && rhs.ty.data_type.is_temporal());
        if !comparable {
            return Err(TypeError::Mismatch {
                expected: lhs.ty.data_type,
                found: rhs.ty.data_type,
                context: format!("Right operand of '{}'", op.as_str()),
                range: right.range,
            });
        }
        DataType::Boolean
    } else {
        // and/or
        if lhs.ty.data_type != DataType::Boolean {
            return Err(TypeError::Mismatch {
                expected: DataType::Boolean,
                found: lhs.ty.data_type,
                context: format!("Left operand of '{}'", op.as_str()),
                range: left.range,
            });
        }
        if rhs.ty.data_type != DataType::Boolean {
            return Err(TypeError::Mismatch {
                expected: DataType::Boolean,
                found: rhs.ty.data_type,
                context: format!("Right operand of '{}'", op.as_str()),
                range: right.range,
            });
        }
        DataType::Boolean
    };

    let parts = [lhs.clone(), rhs.clone()];
    Ok(TypedExpr {
        ty: TypeDesc {
            data_type,
            expression_type: combine_expression_type(&parts),
            eval_space: combine_eval_space(&parts),
        },
        ir: ExprIr::Binary {
            op,
            left: Box::new(lhs.ir),
            right: Box::new(rhs.ir),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::WindowOrder;
    use crate::model::expr::OrderDirection;
    use crate::model::structdef::{StructBase, StructDef};
    use crate::schema::{ColumnShape, RowShape, TableRef};

    fn flights() -> StructDef {
        let shape = RowShape::new(vec![
            ColumnShape::new("carrier", DataType::String),
            ColumnShape::new("distance", DataType::Number),
            ColumnShape::new("dep_time", DataType::Timestamp),
            ColumnShape::new("cancelled", DataType::Boolean),
        ]);
        StructDef::from_row_shape(
            "flights",
            StructBase::Table(TableRef::parse("flights")),
            "standard",
            &shape,
        )
    }

    fn check(expr: Expr, source: &StructDef) -> Result<TypedExpr, TypeError> {
        check_expr(&expr, &Scope::of_source(source))
    }

    #[test]
    fn test_literal_is_constant_scalar() {
        let s = flights();
        let t = check(Expr::integer(42), &s).unwrap();
        assert_eq!(t.ty, TypeDesc::constant(DataType::Number));
    }

    #[test]
    fn test_field_ref_is_input_scalar() {
        let s = flights();
        let t = check(Expr::field(["distance"]), &s).unwrap();
        assert_eq!(t.ty, TypeDesc::scalar(DataType::Number));
        assert_eq!(
            t.ir,
            ExprIr::Field {
                path: vec!["distance".to_string()]
            }
        );
    }

    #[test]
    fn test_count_is_aggregate_number() {
        let s = flights();
        let t = check(Expr::count(), &s).unwrap();
        assert_eq!(t.ty.data_type, DataType::Number);
        assert_eq!(t.ty.expression_type, ExpressionType::Aggregate);
        assert_eq!(t.ty.eval_space, EvalSpace::Output);
    }

    #[test]
    fn test_sum_of_sum_is_illegal() {
        let s = flights();
        let err = check(Expr::sum(Expr::sum(Expr::field(["distance"]))), &s).unwrap_err();
        assert!(matches!(err, TypeError::IllegalAggregateNesting { .. }));
    }

    #[test]
    fn test_sum_of_ungrouped_aggregate_is_legal() {
        let s = flights();
        let inner = Expr::sum(Expr::field(["distance"])).ungrouped();
        let t = check(Expr::sum(inner), &s).unwrap();
        assert_eq!(t.ty.expression_type, ExpressionType::Aggregate);
    }

    #[test]
    fn test_sum_requires_numeric_with_expected_type() {
        let s = flights();
        let err = check(Expr::sum(Expr::field(["carrier"])), &s).unwrap_err();
        match err {
            TypeError::Mismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, DataType::Number);
                assert_eq!(found, DataType::String);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_requires_numbers() {
        let s = flights();
        let ok = check(Expr::field(["distance"]).add(Expr::integer(1)), &s).unwrap();
        assert_eq!(ok.ty.data_type, DataType::Number);

        let err = check(Expr::field(["carrier"]).add(Expr::integer(1)), &s).unwrap_err();
        assert!(matches!(err, TypeError::Mismatch { expected: DataType::Number, .. }));
    }

    #[test]
    fn test_temporal_arithmetic_with_units() {
        let s = flights();
        let t = check(
            Expr::field(["dep_time"]).add(Expr::call("days", vec![Expr::integer(3)])),
            &s,
        )
        .unwrap();
        assert_eq!(t.ty.data_type, DataType::Timestamp);

        // Without explicit units the addition is rejected
        let err = check(Expr::field(["dep_time"]).add(Expr::integer(3)), &s).unwrap_err();
        assert!(matches!(err, TypeError::Mismatch { .. }));
    }

    #[test]
    fn test_comparison_produces_boolean() {
        let s = flights();
        let t = check(Expr::field(["distance"]).gt(Expr::integer(100)), &s).unwrap();
        assert_eq!(t.ty.data_type, DataType::Boolean);
        assert_eq!(t.ty.expression_type, ExpressionType::Scalar);
        assert_eq!(t.ty.eval_space, EvalSpace::Input);
    }

    #[test]
    fn test_comparison_type_mismatch() {
        let s = flights();
        let err = check(Expr::field(["carrier"]).gt(Expr::integer(5)), &s).unwrap_err();
        match err {
            TypeError::Mismatch { expected, .. } => assert_eq!(expected, DataType::String),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_logical_requires_boolean() {
        let s = flights();
        let ok = check(
            Expr::field(["cancelled"]).and(Expr::field(["distance"]).gt(Expr::integer(0))),
            &s,
        )
        .unwrap();
        assert_eq!(ok.ty.data_type, DataType::Boolean);

        let err = check(Expr::field(["carrier"]).or(Expr::boolean(true)), &s).unwrap_err();
        assert!(matches!(err, TypeError::Mismatch { expected: DataType::Boolean, .. }));
    }

    #[test]
    fn test_aggregate_in_binary_keeps_aggregate_kind() {
        let s = flights();
        let t = check(
            Expr::sum(Expr::field(["distance"])).divide(Expr::count()),
            &s,
        )
        .unwrap();
        assert_eq!(t.ty.expression_type, ExpressionType::Aggregate);
        assert_eq!(t.ty.eval_space, EvalSpace::Output);
    }

    #[test]
    fn test_window_requires_ordering() {
        let s = flights();
        let err = check(Expr::window("rank", vec![], vec![], vec![]), &s).unwrap_err();
        assert!(matches!(err, TypeError::MissingWindowOrdering { func, .. } if func == "rank"));

        let ok = check(
            Expr::window(
                "rank",
                vec![],
                vec![Expr::field(["carrier"])],
                vec![WindowOrder {
                    expr: Expr::field(["distance"]),
                    direction: OrderDirection::Desc,
                }],
            ),
            &s,
        )
        .unwrap();
        assert_eq!(ok.ty.expression_type, ExpressionType::Analytic);
        assert_eq!(ok.ty.data_type, DataType::Number);
    }

    #[test]
    fn test_case_branches_must_agree() {
        use crate::ast::expr::CaseBranch;
        let s = flights();
        let ok = check(
            Expr::case(
                vec![CaseBranch {
                    condition: Expr::field(["cancelled"]),
                    value: Expr::string("gone"),
                }],
                Some(Expr::string("flew")),
            ),
            &s,
        )
        .unwrap();
        assert_eq!(ok.ty.data_type, DataType::String);

        let err = check(
            Expr::case(
                vec![CaseBranch {
                    condition: Expr::field(["cancelled"]),
                    value: Expr::string("gone"),
                }],
                Some(Expr::integer(0)),
            ),
            &s,
        )
        .unwrap_err();
        assert!(matches!(err, TypeError::Mismatch { expected: DataType::String, .. }));
    }

    #[test]
    fn test_cast_changes_data_type() {
        let s = flights();
        let t = check(Expr::field(["distance"]).cast(DataType::String), &s).unwrap();
        assert_eq!(t.ty.data_type, DataType::String);
        assert_eq!(t.ty.expression_type, ExpressionType::Scalar);
    }

    #[test]
    fn test_unresolved_name_propagates() {
        let s = flights();
        let err = check(Expr::field(["altitude"]), &s).unwrap_err();
        assert!(matches!(err, TypeError::Resolve(_)));
    }
}
