//! Stage and pipeline assembly
//!
//! The first stage reads the input relation directly under the alias
//! `base`; each later stage wraps its predecessor as a derived table.
//! Only the joins an expression actually walked are emitted, parents
//! before children. All iteration runs over ordered containers, so the
//! same pipeline always renders byte-identical SQL.

use std::collections::{BTreeMap, BTreeSet};

use crate::dialect::{Dialect, DialectRegistry};
use crate::model::expr::ExprIr;
use crate::model::structdef::{FieldDef, JoinKind, StructBase, StructDef};
use crate::pipeline::{CompiledNest, CompiledQuery, CompiledStage, StageKind};

use super::error::GenerateError;
use super::expr::ExprRenderer;

/// Render a compiled pipeline to SQL for its input's dialect.
pub fn generate_sql(
    query: &CompiledQuery,
    registry: &DialectRegistry,
) -> Result<String, GenerateError> {
    if !query.is_resolved() {
        return Err(GenerateError::UnresolvedQuery {
            name: query.name.clone(),
        });
    }
    let dialect = registry.get(&query.input.dialect).clone();

    let mut sql: Option<String> = None;
    for (i, stage) in query.stages.iter().enumerate() {
        let (from, alias) = match &sql {
            None => (base_relation(&stage.input, dialect.as_ref())?, "base".to_string()),
            Some(prev) => (
                format!("(\n{}\n)", indent(prev)),
                format!("stage{}", i - 1),
            ),
        };
        sql = Some(render_stage(stage, &from, &alias, dialect.as_ref(), &[])?);
    }
    sql.ok_or(GenerateError::UnresolvedQuery {
        name: query.name.clone(),
    })
}

/// The FROM relation of a struct: a quoted table name or a parenthesized
/// SQL block. The connection part of a table reference routes the query
/// and never appears in the SQL itself.
fn base_relation(input: &StructDef, dialect: &dyn Dialect) -> Result<String, GenerateError> {
    match &input.base {
        StructBase::Table(table) => Ok(dialect.quote_table(&table.table)),
        StructBase::Sql { select, .. } => Ok(format!("({})", select)),
        StructBase::QueryStage => Err(GenerateError::NoRelation {
            input: input.name.clone(),
        }),
    }
}

fn indent(sql: &str) -> String {
    sql.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_stage(
    stage: &CompiledStage,
    from: &str,
    base_alias: &str,
    dialect: &dyn Dialect,
    extra_where: &[String],
) -> Result<String, GenerateError> {
    if stage.kind == StageKind::Index {
        return render_index_stage(stage, from, base_alias, dialect, extra_where);
    }

    let mut renderer = ExprRenderer::new(&stage.input, base_alias, dialect);
    for item in stage.group_by.iter().chain(stage.aggregates.iter()) {
        renderer.stage_items.push((item.name.clone(), item.ir.clone()));
    }

    let mut select = vec![];
    let items: Vec<_> = match stage.kind {
        StageKind::Reduce => stage.group_by.iter().chain(stage.aggregates.iter()).collect(),
        StageKind::Project => stage.projects.iter().collect(),
        StageKind::Index => unreachable!("handled above"),
    };
    for item in items {
        select.push(format!(
            "{} AS {}",
            renderer.render(&item.ir)?,
            dialect.quote_identifier(&item.name)
        ));
    }
    for nest in &stage.nests {
        select.push(format!(
            "{} AS {}",
            render_nest(nest, stage, &mut renderer, dialect)?,
            dialect.quote_identifier(&nest.name)
        ));
    }

    let mut wheres = vec![];
    for condition in &stage.wheres {
        wheres.push(renderer.render(condition)?);
    }
    wheres.extend(extra_where.iter().cloned());

    let mut havings = vec![];
    for condition in &stage.havings {
        havings.push(renderer.render(condition)?);
    }

    let joins = join_clauses(&mut renderer, dialect)?;

    let mut sql = String::from("SELECT\n");
    sql.push_str(&format!("  {}", select.join(",\n  ")));
    sql.push_str(&format!(
        "\nFROM {} AS {}",
        from,
        dialect.quote_identifier(base_alias)
    ));
    for clause in joins {
        sql.push_str(&format!("\n{}", clause));
    }
    if !wheres.is_empty() {
        sql.push_str(&format!("\nWHERE {}", wheres.join(" AND ")));
    }
    if stage.kind == StageKind::Reduce && !stage.group_by.is_empty() {
        let positions: Vec<String> = (1..=stage.group_by.len()).map(|p| p.to_string()).collect();
        sql.push_str(&format!("\nGROUP BY {}", positions.join(", ")));
    }
    if !havings.is_empty() {
        sql.push_str(&format!("\nHAVING {}", havings.join(" AND ")));
    }
    if !stage.order_by.is_empty() {
        let orders: Vec<String> = stage
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.position, o.direction.as_sql()))
            .collect();
        sql.push_str(&format!("\nORDER BY {}", orders.join(", ")));
    }
    if let Some(limit) = stage.limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }
    Ok(sql)
}

/// An index stage scans each listed field and unions the per-field value
/// summaries into the fixed (field_name, field_value, weight) shape.
fn render_index_stage(
    stage: &CompiledStage,
    from: &str,
    base_alias: &str,
    dialect: &dyn Dialect,
    extra_where: &[String],
) -> Result<String, GenerateError> {
    let mut arms = vec![];
    for field in &stage.index_fields {
        let mut renderer = ExprRenderer::new(&stage.input, base_alias, dialect);
        let value = renderer.render(&ExprIr::Field {
            path: vec![field.clone()],
        })?;
        let weight = match &stage.index_weight {
            Some(weight) => format!(
                "SUM({})",
                renderer.render(&ExprIr::Field {
                    path: vec![weight.clone()],
                })?
            ),
            None => "COUNT(*)".to_string(),
        };
        let mut wheres = vec![];
        for condition in &stage.wheres {
            wheres.push(renderer.render(condition)?);
        }
        wheres.extend(extra_where.iter().cloned());
        let joins = join_clauses(&mut renderer, dialect)?;

        let mut arm = String::from("SELECT\n");
        arm.push_str(&format!(
            "  {} AS {},\n",
            dialect.sql_string_literal(field),
            dialect.quote_identifier("field_name")
        ));
        arm.push_str(&format!(
            "  {} AS {},\n",
            dialect.sql_cast(&value, &crate::model::types::DataType::String),
            dialect.quote_identifier("field_value")
        ));
        arm.push_str(&format!(
            "  {} AS {}",
            weight,
            dialect.quote_identifier("weight")
        ));
        arm.push_str(&format!(
            "\nFROM {} AS {}",
            from,
            dialect.quote_identifier(base_alias)
        ));
        for clause in joins {
            arm.push_str(&format!("\n{}", clause));
        }
        if !wheres.is_empty() {
            arm.push_str(&format!("\nWHERE {}", wheres.join(" AND ")));
        }
        arm.push_str("\nGROUP BY 1, 2");
        arms.push(arm);
    }
    Ok(arms.join("\nUNION ALL\n"))
}

/// Emit clauses for every join the renderer walked, parents before
/// children. Rendering an ON condition may itself walk further joins, so
/// this loops until the set settles.
fn join_clauses(
    renderer: &mut ExprRenderer<'_>,
    dialect: &dyn Dialect,
) -> Result<Vec<String>, GenerateError> {
    let mut emitted: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut clauses: BTreeMap<Vec<String>, String> = BTreeMap::new();

    loop {
        let pending: Vec<Vec<String>> = renderer
            .used_joins
            .iter()
            .filter(|path| !emitted.contains(*path))
            .cloned()
            .collect();
        if pending.is_empty() {
            break;
        }
        for path in pending {
            emitted.insert(path.clone());

            let mut current = renderer.input;
            let mut join = None;
            for (depth, segment) in path.iter().enumerate() {
                match current.get_field(segment) {
                    Some(FieldDef::Join(j)) => {
                        current = &j.source;
                        if depth == path.len() - 1 {
                            join = Some(j);
                        }
                    }
                    _ => {
                        return Err(GenerateError::UnknownField {
                            path: path.join("."),
                            input: renderer.input.name.clone(),
                        })
                    }
                }
            }
            let join = join.ok_or_else(|| GenerateError::UnknownField {
                path: path.join("."),
                input: renderer.input.name.clone(),
            })?;

            let relation = base_relation(&join.source, dialect)?;
            let alias = dialect.quote_identifier(&renderer.join_alias(&path));
            let parent_path = &path[..path.len() - 1];

            let clause = match join.kind {
                JoinKind::Cross => format!("CROSS JOIN {} AS {}", relation, alias),
                JoinKind::One | JoinKind::Many => {
                    let on = if let Some(on) = &join.on {
                        let on = on.clone();
                        renderer.render_prefixed(&on, parent_path)?
                    } else if let Some(with) = &join.with {
                        // `with key` equates the key with the target's
                        // primary key column
                        let with = with.clone();
                        let key = renderer.render_prefixed(&with, parent_path)?;
                        let pk = join.source.primary_key.clone().ok_or_else(|| {
                            GenerateError::UnknownField {
                                path: format!("{}.<primary key>", path.join(".")),
                                input: join.source.name.clone(),
                            }
                        })?;
                        let pk_column = renderer.render_prefixed(
                            &ExprIr::Field {
                                path: vec![pk],
                            },
                            &path,
                        )?;
                        format!("{} = {}", key, pk_column)
                    } else {
                        dialect.sql_boolean_literal(true)
                    };
                    format!("LEFT JOIN {} AS {} ON {}", relation, alias, on)
                }
            };
            clauses.insert(path, clause);
        }
    }
    Ok(clauses.into_values().collect())
}

/// A nest renders as a correlated scalar subquery: the sub-pipeline runs
/// against the same input relation, restricted to the parent's group by
/// equating every parent group_by expression, and its rows are collapsed
/// into one repeated-record value by the dialect.
fn render_nest(
    nest: &CompiledNest,
    parent: &CompiledStage,
    parent_renderer: &mut ExprRenderer<'_>,
    dialect: &dyn Dialect,
) -> Result<String, GenerateError> {
    let inner_base = format!("{}_base", nest.name);

    let first = nest.stages.first().ok_or_else(|| GenerateError::UnresolvedQuery {
        name: nest.name.clone(),
    })?;
    let mut correlations = vec![];
    for item in &parent.group_by {
        let mut inner = ExprRenderer::new(&first.input, &inner_base, dialect);
        let inner_sql = inner.render(&item.ir)?;
        let outer_sql = parent_renderer.render(&item.ir)?;
        correlations.push(format!("{} = {}", inner_sql, outer_sql));
    }

    let mut sql: Option<String> = None;
    for (i, stage) in nest.stages.iter().enumerate() {
        let (from, alias) = match &sql {
            None => (base_relation(&stage.input, dialect)?, inner_base.clone()),
            Some(prev) => (
                format!("(\n{}\n)", indent(prev)),
                format!("{}_stage{}", nest.name, i - 1),
            ),
        };
        let extra = if i == 0 { correlations.as_slice() } else { &[] };
        sql = Some(render_stage(stage, &from, &alias, dialect, extra)?);
    }
    let sql = sql.ok_or_else(|| GenerateError::UnresolvedQuery {
        name: nest.name.clone(),
    })?;

    let inner_alias = format!("{}_inner", nest.name);
    let columns: Vec<String> = nest
        .output()
        .map(|o| o.row_schema().into_iter().map(|(name, _)| name).collect())
        .unwrap_or_default();
    Ok(format!(
        "(SELECT {} FROM (\n{}\n) AS {})",
        dialect.nest_aggregate(&dialect.quote_identifier(&inner_alias), &columns),
        indent(&sql),
        dialect.quote_identifier(&inner_alias)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, QueryDef, QueryItem, StageAst};
    use crate::compiler::compile_query;
    use crate::diagnostics::{DiagnosticLog, SourceRange};
    use crate::model::types::{DataType, TypeDesc};
    use crate::model::{
        AggFunc, ExprField, JoinField, Model, SourceEntry, StructBase,
    };
    use crate::schema::{ColumnShape, RowShape, TableRef};
    use std::sync::Arc;

    fn flights_struct() -> StructDef {
        let shape = RowShape::new(vec![
            ColumnShape::new("carrier", DataType::String),
            ColumnShape::new("distance", DataType::Number),
        ]);
        let mut s = StructDef::from_row_shape(
            "flights",
            StructBase::Table(TableRef::parse("duckdb:flights")),
            "standard",
            &shape,
        );
        s.add_field(FieldDef::Measure(ExprField {
            name: "flight_count".to_string(),
            expr: Some(ExprIr::Aggregate {
                func: AggFunc::Count,
                operand: None,
                ungrouped: false,
            }),
            ty: TypeDesc::aggregate(DataType::Number),
            range: SourceRange::none(),
        }));
        s
    }

    fn model_of(s: StructDef) -> Model {
        let mut model = Model::new();
        model.sources.push(SourceEntry::Struct(Arc::new(s)));
        model
    }

    fn sql_for(query: QueryDef, model: &Model) -> String {
        let mut log = DiagnosticLog::new();
        let compiled = compile_query(&query, model, &mut log).unwrap();
        assert!(!log.has_errors(), "diagnostics: {:?}", log.entries());
        generate_sql(&compiled, &DialectRegistry::standard()).unwrap()
    }

    #[test]
    fn test_flat_reduce_stage() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("by_carrier", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::field(["flight_count"])])
                .order_by(vec![crate::ast::OrderBySpec::desc("flight_count")])
                .limit(5),
        );
        let sql = sql_for(query, &model);
        assert_eq!(
            sql,
            "SELECT\n  \
               \"base\".\"carrier\" AS \"carrier\",\n  \
               COUNT(*) AS \"flight_count\"\n\
             FROM \"flights\" AS \"base\"\n\
             GROUP BY 1\n\
             ORDER BY 2 DESC\n\
             LIMIT 5"
        );
    }

    #[test]
    fn test_aggregate_only_has_no_group_by() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("totals", "flights").with_stage(
            StageAst::new().aggregate(vec![QueryItem::field(["flight_count"])]),
        );
        let sql = sql_for(query, &model);
        assert_eq!(
            sql,
            "SELECT\n  COUNT(*) AS \"flight_count\"\nFROM \"flights\" AS \"base\""
        );
    }

    #[test]
    fn test_where_and_having() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("filtered", "flights").with_stage(
            StageAst::new()
                .where_(Expr::field(["distance"]).gt(Expr::integer(500)))
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::named("n", Expr::count())])
                .having(Expr::field(["n"]).gt(Expr::integer(10))),
        );
        let sql = sql_for(query, &model);
        assert!(sql.contains("WHERE (\"base\".\"distance\" > 500)"));
        // The having reference to 'n' re-expands to its aggregate
        assert!(sql.contains("HAVING (COUNT(*) > 10)"));
    }

    #[test]
    fn test_only_referenced_joins_emitted() {
        let carriers_shape = RowShape::new(vec![
            ColumnShape::new("code", DataType::String),
            ColumnShape::new("nickname", DataType::String),
        ]);
        let carriers = StructDef::from_row_shape(
            "carriers",
            StructBase::Table(TableRef::parse("duckdb:carriers")),
            "standard",
            &carriers_shape,
        );
        let airports = StructDef::from_row_shape(
            "airports",
            StructBase::Table(TableRef::parse("duckdb:airports")),
            "standard",
            &RowShape::new(vec![ColumnShape::new("code", DataType::String)]),
        );

        let mut flights = flights_struct();
        flights.add_field(FieldDef::Join(JoinField {
            name: "carriers".to_string(),
            source: Arc::new(carriers),
            kind: crate::model::JoinKind::One,
            on: Some(ExprIr::Binary {
                op: crate::model::BinaryOp::Eq,
                left: Box::new(ExprIr::Field {
                    path: vec!["carrier".to_string()],
                }),
                right: Box::new(ExprIr::Field {
                    path: vec!["carriers".to_string(), "code".to_string()],
                }),
            }),
            with: None,
            range: SourceRange::none(),
        }));
        flights.add_field(FieldDef::Join(JoinField {
            name: "origin".to_string(),
            source: Arc::new(airports),
            kind: crate::model::JoinKind::One,
            on: None,
            with: None,
            range: SourceRange::none(),
        }));

        let model = model_of(flights);
        let query = QueryDef::new("named", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carriers", "nickname"])])
                .aggregate(vec![QueryItem::named("n", Expr::count())]),
        );
        let sql = sql_for(query, &model);
        assert!(sql.contains(
            "LEFT JOIN \"carriers\" AS \"carriers\" ON (\"base\".\"carrier\" = \"carriers\".\"code\")"
        ));
        // The untouched join stays out of the query
        assert!(!sql.contains("origin"));
    }

    #[test]
    fn test_multi_stage_wraps_previous() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("two", "flights")
            .with_stage(
                StageAst::new()
                    .group_by(vec![QueryItem::field(["carrier"])])
                    .aggregate(vec![QueryItem::named("n", Expr::count())]),
            )
            .with_stage(
                StageAst::new()
                    .project(vec![QueryItem::field(["carrier"])])
                    .where_(Expr::field(["n"]).gt(Expr::integer(100))),
            );
        let sql = sql_for(query, &model);
        assert!(sql.starts_with("SELECT\n  \"stage0\".\"carrier\" AS \"carrier\"\nFROM (\n"));
        assert!(sql.contains("AS \"stage0\""));
        assert!(sql.contains("WHERE (\"stage0\".\"n\" > 100)"));
    }

    #[test]
    fn test_nest_renders_array_agg() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("nested", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .nest(vec![crate::ast::NestDecl::inline(
                    "by_distance",
                    vec![StageAst::new()
                        .group_by(vec![QueryItem::field(["distance"])])
                        .aggregate(vec![QueryItem::named("n", Expr::count())])],
                )]),
        );
        let sql = sql_for(query, &model);
        assert!(sql.contains("ARRAY_AGG(STRUCT("));
        // The sub-pipeline correlates to the parent grouping
        assert!(sql.contains("\"by_distance_base\".\"carrier\" = \"base\".\"carrier\""));
        assert!(sql.contains("AS \"by_distance\""));
    }

    #[test]
    fn test_index_stage_union() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("idx", "flights").with_stage(StageAst::new().index(
            crate::ast::IndexSpec::on(["carrier", "distance"]).weighted_by("distance"),
        ));
        let sql = sql_for(query, &model);
        assert_eq!(sql.matches("UNION ALL").count(), 1);
        assert!(sql.contains("'carrier' AS \"field_name\""));
        assert!(sql.contains("CAST(\"base\".\"carrier\" AS VARCHAR) AS \"field_value\""));
        assert!(sql.contains("SUM(\"base\".\"distance\") AS \"weight\""));
        assert!(sql.contains("GROUP BY 1, 2"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("by_carrier", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::field(["flight_count"])]),
        );
        let mut log = DiagnosticLog::new();
        let compiled = compile_query(&query, &model, &mut log).unwrap();
        let registry = DialectRegistry::standard();
        let first = generate_sql(&compiled, &registry).unwrap();
        let second = generate_sql(&compiled, &registry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolved_query_refused() {
        let model = model_of(flights_struct());
        let query = QueryDef::new("bad", "flights").with_stage(
            StageAst::new().aggregate(vec![QueryItem::field(["carrier"])]),
        );
        let mut log = DiagnosticLog::new();
        let compiled = compile_query(&query, &model, &mut log).unwrap();
        let err = generate_sql(&compiled, &DialectRegistry::standard()).unwrap_err();
        assert!(matches!(err, GenerateError::UnresolvedQuery { name } if name == "bad"));
    }
}
