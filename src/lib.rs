//! quarry: the semantic core of a data-modeling query language
//!
//! A document declares reusable sources (tables enriched with dimensions,
//! measures, joins, and named views) and queries (pipelines of grouped,
//! projected, or index stages over a source). quarry resolves those
//! declarations into a typed model, compiles each query into a checked
//! pipeline, and renders dialect-correct SQL.
//!
//! The crate is organized around nouns and verbs. The nouns:
//!
//! - [`ast`]: the parsed-input document tree (parsing is external)
//! - [`model`]: resolved sources, typed fields, composites, expression IR
//! - [`pipeline`]: compiled query stages with minted output schemas
//! - [`schema`]: table shapes and the provider contracts connectors satisfy
//! - [`dialect`]: per-engine SQL syntax rules
//! - [`diagnostics`]: accumulated, source-located problem reports
//!
//! And the verbs, one per translation phase:
//!
//! - [`resolver`]: names to fields, through scope chains and join paths
//! - [`checker`]: expressions to typed IR
//! - [`builder`]: source definitions to structs and composites
//! - [`selector`]: composite branches picked per query
//! - [`compiler`]: query ASTs to compiled pipelines
//! - [`generator`]: compiled pipelines to SQL text
//! - [`translate`]: the pull-based driver tying the phases together
//!
//! The core never performs I/O. [`translate::Translator::advance`] reports
//! the documents and table schemas it still needs; the orchestrator fetches
//! them and feeds them back with [`translate::Translator::update`]:
//!
//! ```
//! use quarry::ast::{Document, Expr, QueryDef, QueryItem, SourceDef, StageAst};
//! use quarry::dialect::DialectRegistry;
//! use quarry::schema::{ColumnShape, RowShape, TableRef};
//! use quarry::translate::{Response, Translator, Update};
//! use quarry::model::DataType;
//!
//! let document = Document::new()
//!     .with_source(
//!         SourceDef::from_table("flights", TableRef::parse("duckdb:flights"))
//!             .with_measure("flight_count", Expr::count()),
//!     )
//!     .with_query(QueryDef::new("totals", "flights").with_stage(
//!         StageAst::new().aggregate(vec![QueryItem::field(["flight_count"])]),
//!     ));
//!
//! let mut translator = Translator::new(document, DialectRegistry::standard());
//! let needs = translator.advance();
//! assert!(matches!(needs, Response::NeedsSchemas { .. }));
//!
//! translator.update(Update::new().with_schema(
//!     TableRef::parse("duckdb:flights"),
//!     RowShape::new(vec![ColumnShape::new("carrier", DataType::String)]),
//! ));
//! match translator.advance() {
//!     Response::Translated(translation) => {
//!         let totals = translation.get_query("totals").unwrap();
//!         assert!(totals.sql.contains("COUNT(*)"));
//!     }
//!     other => panic!("unexpected response: {:?}", other),
//! }
//! ```

pub mod ast;
pub mod builder;
pub mod checker;
pub mod compiler;
pub mod diagnostics;
pub mod dialect;
pub mod generator;
pub mod model;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod selector;
pub mod translate;

pub use diagnostics::{Diagnostic, DiagnosticCode, DiagnosticLog, Severity, SourceRange};
pub use dialect::{Dialect, DialectRegistry};
pub use model::Model;
pub use translate::{Response, Translation, Translator, Update};
