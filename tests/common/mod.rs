#![allow(dead_code)]

use std::collections::BTreeMap;

use quarry::ast::Document;
use quarry::dialect::DialectRegistry;
use quarry::schema::{load_schemas_file, RowShape, SchemaFetch, SchemaProvider, TableRef};
use quarry::translate::{run_to_completion, Response, Translation, Translator};

/// Serves table shapes from the YAML fixture; unknown tables come back as
/// fetch errors, like a real connector would report them.
pub struct YamlSchemaProvider {
    tables: BTreeMap<TableRef, RowShape>,
}

impl YamlSchemaProvider {
    pub fn from_fixture() -> Self {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/test_data/schemas.yaml");
        let tables = load_schemas_file(path).expect("fixture schemas should parse");
        YamlSchemaProvider { tables }
    }
}

impl SchemaProvider for YamlSchemaProvider {
    fn fetch_schema(&self, names: &[TableRef]) -> SchemaFetch {
        let mut fetch = SchemaFetch::default();
        for table in names {
            match self.tables.get(table) {
                Some(shape) => {
                    fetch.schemas.insert(table.clone(), shape.clone());
                }
                None => {
                    fetch
                        .errors
                        .insert(table.clone(), format!("no such table: {}", table));
                }
            }
        }
        fetch
    }
}

/// Drive a document to a terminal response against the fixture schemas.
pub fn translate(document: Document) -> Response {
    let mut translator = Translator::new(document, DialectRegistry::standard());
    run_to_completion(&mut translator, &YamlSchemaProvider::from_fixture(), None)
}

/// Translate and unwrap success, printing diagnostics on failure.
pub fn translate_ok(document: Document) -> Translation {
    match translate(document) {
        Response::Translated(translation) => translation,
        Response::Failed(diagnostics) => {
            panic!("translation failed:\n{:#?}", diagnostics)
        }
        other => panic!("translation did not finish: {:?}", other),
    }
}
