mod common;

use pretty_assertions::assert_eq;

use quarry::ast::{
    BranchDef, Document, Expr, NestDecl, OrderBySpec, QueryDef, QueryItem, SourceDef, StageAst,
};
use quarry::diagnostics::DiagnosticCode;
use quarry::model::DataType;
use quarry::schema::TableRef;
use quarry::translate::Response;

use common::{translate, translate_ok};

fn flights_source() -> SourceDef {
    SourceDef::from_table("flights", TableRef::parse("duckdb:flights"))
        .with_measure("flight_count", Expr::count())
}

fn joined_flights_document() -> Document {
    Document::new()
        .with_source(
            SourceDef::from_table("carriers", TableRef::parse("duckdb:carriers"))
                .with_primary_key("code"),
        )
        .with_source(flights_source().with_join_one_key(
            "carriers",
            "carriers",
            Expr::field(["carrier"]),
        ))
}

// ============================================================================
// Joins
// ============================================================================

#[test]
fn test_referenced_join_is_emitted() {
    let document = joined_flights_document().with_query(
        QueryDef::new("by_carrier", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carriers", "nickname"])])
                .aggregate(vec![QueryItem::field(["flight_count"])])
                .order_by(vec![OrderBySpec::desc("flight_count")])
                .limit(5),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("by_carrier").unwrap();
    assert!(query.sql.contains("LEFT JOIN"), "sql: {}", query.sql);
    assert!(query.sql.contains("\"nickname\""), "sql: {}", query.sql);
    assert!(query.sql.contains("LIMIT 5"), "sql: {}", query.sql);
    assert!(query.sql.contains("DESC"), "sql: {}", query.sql);
    assert_eq!(
        query.output_schema,
        vec![
            ("nickname".to_string(), DataType::String),
            ("flight_count".to_string(), DataType::Number),
        ]
    );
}

#[test]
fn test_unreferenced_join_is_omitted() {
    let document = joined_flights_document().with_query(
        QueryDef::new("by_origin", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["origin"])])
                .aggregate(vec![QueryItem::field(["flight_count"])]),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("by_origin").unwrap();
    assert!(!query.sql.contains("JOIN"), "sql: {}", query.sql);
}

// ============================================================================
// Nests
// ============================================================================

#[test]
fn test_nested_turtle_renders_aggregated_subquery() {
    let document = Document::new()
        .with_source(flights_source().with_turtle(
            "by_carrier",
            vec![StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::field(["flight_count"])])],
        ))
        .with_query(
            QueryDef::new("origins", "flights").with_stage(
                StageAst::new()
                    .group_by(vec![QueryItem::field(["origin"])])
                    .aggregate(vec![QueryItem::field(["flight_count"])])
                    .nest(vec![NestDecl::of_turtle("by_carrier")]),
            ),
        );

    let translation = translate_ok(document);
    let query = translation.get_query("origins").unwrap();
    assert!(query.sql.contains("ARRAY_AGG"), "sql: {}", query.sql);
    assert_eq!(
        query.output_schema,
        vec![
            ("origin".to_string(), DataType::String),
            ("flight_count".to_string(), DataType::Number),
            ("by_carrier".to_string(), DataType::Array),
        ]
    );
}

// ============================================================================
// Composite branch selection
// ============================================================================

fn geo_document() -> Document {
    Document::new()
        .with_source(SourceDef::from_table(
            "by_state",
            TableRef::parse("duckdb:geo_state"),
        ))
        .with_source(SourceDef::from_table(
            "by_county",
            TableRef::parse("duckdb:geo_county"),
        ))
        .with_source(SourceDef::composite(
            "geo",
            vec![BranchDef::new("by_state"), BranchDef::new("by_county")],
        ))
}

#[test]
fn test_composite_picks_first_satisfying_branch() {
    let document = geo_document().with_query(
        QueryDef::new("state_pop", "geo").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["state"])])
                .aggregate(vec![QueryItem::named(
                    "total",
                    Expr::sum(Expr::field(["population"])),
                )]),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("state_pop").unwrap();
    // Both branches expose state and population; the first one declared wins
    assert!(query.sql.contains("geo_state"), "sql: {}", query.sql);
    assert!(!query.sql.contains("geo_county"), "sql: {}", query.sql);
}

#[test]
fn test_composite_skips_branch_missing_a_field() {
    let document = geo_document().with_query(
        QueryDef::new("county_pop", "geo").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["county"])])
                .aggregate(vec![QueryItem::named(
                    "total",
                    Expr::sum(Expr::field(["population"])),
                )]),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("county_pop").unwrap();
    assert!(query.sql.contains("geo_county"), "sql: {}", query.sql);
}

#[test]
fn test_composite_with_no_satisfying_branch_fails() {
    let document = geo_document().with_query(
        QueryDef::new("city_pop", "geo").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["city"])])
                .aggregate(vec![QueryItem::named(
                    "total",
                    Expr::sum(Expr::field(["population"])),
                )]),
        ),
    );

    let diagnostics = match translate(document) {
        Response::Failed(diagnostics) => diagnostics,
        other => panic!("expected failure, got {:?}", other),
    };
    let branch_error = diagnostics
        .iter()
        .find(|d| d.code == DiagnosticCode::NoSatisfyingCompositeBranch)
        .unwrap_or_else(|| panic!("diagnostics: {:#?}", diagnostics));
    // The message names only fields no branch exposes
    assert!(branch_error.message.contains("city"));
    assert!(!branch_error.message.contains("population"));
}

#[test]
fn test_having_on_output_alias_still_selects_a_branch() {
    // 'total' is minted by the stage, not supplied by a branch
    let document = geo_document().with_query(
        QueryDef::new("populous", "geo").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["state"])])
                .aggregate(vec![QueryItem::named(
                    "total",
                    Expr::sum(Expr::field(["population"])),
                )])
                .having(Expr::field(["total"]).gt(Expr::integer(0))),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("populous").unwrap();
    assert!(query.sql.contains("geo_state"), "sql: {}", query.sql);
    assert!(query.sql.contains("HAVING"), "sql: {}", query.sql);
}

// ============================================================================
// Renames
// ============================================================================

#[test]
fn test_renamed_field_selects_original_column() {
    let document = Document::new()
        .with_source(flights_source().with_rename("dist", "distance"))
        .with_query(
            QueryDef::new("distances", "flights")
                .with_stage(StageAst::new().project(vec![QueryItem::field(["dist"])])),
        );

    let translation = translate_ok(document);
    let query = translation.get_query("distances").unwrap();
    assert!(
        query.sql.contains("\"base\".\"distance\" AS \"dist\""),
        "sql: {}",
        query.sql
    );
    assert!(!query.sql.contains("\"base\".\"dist\""), "sql: {}", query.sql);
    assert_eq!(
        query.output_schema,
        vec![("dist".to_string(), DataType::Number)]
    );
}

// ============================================================================
// Stages
// ============================================================================

#[test]
fn test_where_cannot_see_stage_output() {
    let document = Document::new().with_source(flights_source()).with_query(
        QueryDef::new("busy", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::named("n", Expr::count())])
                .where_(Expr::field(["n"]).gt(Expr::integer(100))),
        ),
    );

    let diagnostics = match translate(document) {
        Response::Failed(diagnostics) => diagnostics,
        other => panic!("expected failure, got {:?}", other),
    };
    assert!(
        diagnostics
            .iter()
            .any(|d| d.code == DiagnosticCode::NameNotFound && d.message.contains("n")),
        "diagnostics: {:#?}",
        diagnostics
    );
}

#[test]
fn test_having_sees_stage_output() {
    let document = Document::new().with_source(flights_source()).with_query(
        QueryDef::new("busy", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::named("n", Expr::count())])
                .having(Expr::field(["n"]).gt(Expr::integer(100))),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("busy").unwrap();
    assert!(query.sql.contains("HAVING"), "sql: {}", query.sql);
}

#[test]
fn test_second_stage_reads_first_stage_output() {
    let document = Document::new().with_source(flights_source()).with_query(
        QueryDef::new("top_names", "flights")
            .with_stage(
                StageAst::new()
                    .group_by(vec![QueryItem::field(["carrier"])])
                    .aggregate(vec![QueryItem::named("n", Expr::count())]),
            )
            .with_stage(
                StageAst::new()
                    .project(vec![QueryItem::field(["carrier"])])
                    .where_(Expr::field(["n"]).gt(Expr::integer(10))),
            ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("top_names").unwrap();
    assert!(query.sql.contains("AS \"stage0\""), "sql: {}", query.sql);
    assert_eq!(
        query.output_schema,
        vec![("carrier".to_string(), DataType::String)]
    );
}

// ============================================================================
// Refinement
// ============================================================================

#[test]
fn test_refinement_replaces_limit_and_appends_items() {
    let document = Document::new()
        .with_source(flights_source())
        .with_query(
            QueryDef::new("top", "flights").with_stage(
                StageAst::new()
                    .group_by(vec![QueryItem::field(["carrier"])])
                    .aggregate(vec![QueryItem::field(["flight_count"])])
                    .limit(10),
            ),
        )
        .with_query(
            QueryDef::refining("top_by_origin", "top").with_stage(
                StageAst::new()
                    .group_by(vec![QueryItem::field(["origin"])])
                    .limit(5),
            ),
        );

    let translation = translate_ok(document);

    let base = translation.get_query("top").unwrap();
    assert!(base.sql.contains("LIMIT 10"), "sql: {}", base.sql);

    let refined = translation.get_query("top_by_origin").unwrap();
    assert!(refined.sql.contains("LIMIT 5"), "sql: {}", refined.sql);
    assert!(!refined.sql.contains("LIMIT 10"), "sql: {}", refined.sql);
    assert_eq!(
        refined.output_schema,
        vec![
            ("carrier".to_string(), DataType::String),
            ("origin".to_string(), DataType::String),
            ("flight_count".to_string(), DataType::Number),
        ]
    );
}

// ============================================================================
// Ungrouped aggregates
// ============================================================================

#[test]
fn test_ungrouped_aggregate_spans_all_groups() {
    let document = Document::new().with_source(flights_source()).with_query(
        QueryDef::new("share", "flights").with_stage(
            StageAst::new()
                .group_by(vec![QueryItem::field(["carrier"])])
                .aggregate(vec![QueryItem::named(
                    "flight_share",
                    Expr::count().divide(Expr::count().ungrouped()),
                )]),
        ),
    );

    let translation = translate_ok(document);
    let query = translation.get_query("share").unwrap();
    assert!(query.sql.contains("OVER ()"), "sql: {}", query.sql);
}
