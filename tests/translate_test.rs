mod common;

use pretty_assertions::assert_eq;

use quarry::ast::{Document, Expr, QueryDef, QueryItem, SourceDef, StageAst};
use quarry::diagnostics::{DiagnosticCode, Severity};
use quarry::model::DataType;
use quarry::schema::TableRef;
use quarry::translate::Response;

use common::{translate, translate_ok};

fn flights_source() -> SourceDef {
    SourceDef::from_table("flights", TableRef::parse("duckdb:flights"))
        .with_measure("flight_count", Expr::count())
}

#[test]
fn test_count_without_grouping() {
    let document = Document::new().with_source(flights_source()).with_query(
        QueryDef::new("totals", "flights")
            .with_stage(StageAst::new().aggregate(vec![QueryItem::field(["flight_count"])])),
    );

    let translation = translate_ok(document);
    let totals = translation.get_query("totals").unwrap();
    assert_eq!(
        totals.output_schema,
        vec![("flight_count".to_string(), DataType::Number)]
    );
    assert!(totals.sql.contains("COUNT(*)"), "sql: {}", totals.sql);
    assert!(!totals.sql.contains("GROUP BY"), "sql: {}", totals.sql);
}

#[test]
fn test_unknown_table_failure_is_local() {
    // One broken source must not poison diagnostics for the healthy one
    let document = Document::new()
        .with_source(flights_source())
        .with_source(SourceDef::from_table(
            "ghosts",
            TableRef::parse("duckdb:no_such_table"),
        ))
        .with_query(
            QueryDef::new("totals", "flights")
                .with_stage(StageAst::new().aggregate(vec![QueryItem::field(["flight_count"])])),
        )
        .with_query(
            QueryDef::new("haunted", "ghosts")
                .with_stage(StageAst::new().aggregate(vec![QueryItem::named("n", Expr::count())])),
        );

    let diagnostics = match translate(document) {
        Response::Failed(diagnostics) => diagnostics,
        other => panic!("expected failure, got {:?}", other),
    };
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1, "diagnostics: {:#?}", diagnostics);
    assert_eq!(errors[0].code, DiagnosticCode::SchemaFetchFailed);
    assert!(errors[0].message.contains("no_such_table"));
}

#[test]
fn test_translation_is_deterministic() {
    let document = || {
        Document::new().with_source(flights_source()).with_query(
            QueryDef::new("by_origin", "flights").with_stage(
                StageAst::new()
                    .group_by(vec![
                        QueryItem::field(["origin"]),
                        QueryItem::field(["destination"]),
                    ])
                    .aggregate(vec![QueryItem::field(["flight_count"])]),
            ),
        )
    };

    let first = translate_ok(document());
    let second = translate_ok(document());
    assert_eq!(first.model, second.model);
    assert_eq!(
        first.get_query("by_origin").unwrap().sql,
        second.get_query("by_origin").unwrap().sql
    );
}

#[test]
fn test_unreadable_import_fails() {
    // No document reader is wired up, so any import must surface as an error
    let document = Document::new()
        .with_import("lib/shared")
        .with_source(flights_source());

    let diagnostics = match translate(document) {
        Response::Failed(diagnostics) => diagnostics,
        other => panic!("expected failure, got {:?}", other),
    };
    assert!(diagnostics
        .iter()
        .any(|d| d.message.contains("Could not import 'lib/shared'")));
}
