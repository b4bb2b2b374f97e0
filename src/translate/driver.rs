//! Incremental translation
//!
//! The translator never performs I/O. `advance` inspects what it has and
//! either reports what it still needs (imported documents first, then
//! table schemas) or runs the full translation. The orchestrator answers
//! needs through `update` and calls `advance` again; once a terminal
//! response is produced it is cached and every later `advance` returns it
//! unchanged.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{Document, SourceBase, Statement};
use crate::builder::build_model;
use crate::compiler::compile_query;
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticLog, SourceRange};
use crate::dialect::DialectRegistry;
use crate::generator::generate_sql;
use crate::model::types::DataType;
use crate::model::Model;
use crate::pipeline::CompiledQuery;
use crate::schema::{DocumentReader, RowShape, SchemaProvider, SchemaStore, TableRef};

/// What a translator needs or has produced
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Imported documents that must be parsed and supplied
    NeedsDocuments { urls: Vec<String> },
    /// Table schemas that must be fetched and supplied
    NeedsSchemas { tables: Vec<TableRef> },
    /// Terminal success
    Translated(Translation),
    /// Terminal failure; at least one error-severity diagnostic
    Failed(Vec<Diagnostic>),
}

impl Response {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Response::Translated(_) | Response::Failed(_))
    }
}

/// A successfully translated document
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub model: Model,
    pub queries: Vec<TranslatedQuery>,
}

impl Translation {
    pub fn get_query(&self, name: &str) -> Option<&TranslatedQuery> {
        self.queries.iter().find(|q| q.name == name)
    }
}

/// One compiled and rendered named query
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub name: String,
    pub sql: String,
    pub output_schema: Vec<(String, DataType)>,
    pub pipeline: CompiledQuery,
}

/// Answers to a translator's reported needs
#[derive(Debug, Clone, Default)]
pub struct Update {
    pub documents: BTreeMap<String, Document>,
    pub document_errors: BTreeMap<String, String>,
    pub schemas: BTreeMap<TableRef, RowShape>,
    pub errors: BTreeMap<TableRef, String>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn with_document(mut self, url: impl Into<String>, document: Document) -> Self {
        self.documents.insert(url.into(), document);
        self
    }

    pub fn with_schema(mut self, table: TableRef, shape: RowShape) -> Self {
        self.schemas.insert(table, shape);
        self
    }

    pub fn with_schema_error(mut self, table: TableRef, message: impl Into<String>) -> Self {
        self.errors.insert(table, message.into());
        self
    }
}

/// Incremental translator for one root document
#[derive(Debug)]
pub struct Translator {
    root: Document,
    registry: DialectRegistry,
    documents: BTreeMap<String, Document>,
    document_errors: BTreeMap<String, String>,
    store: SchemaStore,
    diagnostics: Vec<Diagnostic>,
    terminal: Option<Response>,
}

impl Translator {
    pub fn new(root: Document, registry: DialectRegistry) -> Self {
        Translator {
            root,
            registry,
            documents: BTreeMap::new(),
            document_errors: BTreeMap::new(),
            store: SchemaStore::new(),
            diagnostics: vec![],
            terminal: None,
        }
    }

    /// Diagnostics from the most recent translation attempt
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Feed answers back. Ignored once a terminal response exists.
    pub fn update(&mut self, update: Update) {
        if self.terminal.is_some() {
            return;
        }
        for (url, document) in update.documents {
            self.documents.insert(url, document);
        }
        for (url, message) in update.document_errors {
            self.document_errors.insert(url, message);
        }
        for (table, shape) in update.schemas {
            self.store.insert(table, shape);
        }
        for (table, message) in update.errors {
            self.store.insert_error(table, message);
        }
    }

    /// Take one step: report missing inputs, or translate.
    pub fn advance(&mut self) -> Response {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }

        // Import failures are re-recorded by each flattening pass
        self.diagnostics.clear();

        let missing_documents = self.missing_documents();
        if !missing_documents.is_empty() {
            return Response::NeedsDocuments {
                urls: missing_documents,
            };
        }

        let statements = self.flatten_statements();
        let missing_tables = self.missing_tables(&statements);
        if !missing_tables.is_empty() {
            return Response::NeedsSchemas {
                tables: missing_tables,
            };
        }

        let response = self.translate(&statements);
        self.terminal = Some(response.clone());
        response
    }

    /// Import URLs referenced anywhere in the reachable document graph
    /// that have neither a document nor a read error yet. Sorted, deduped.
    fn missing_documents(&self) -> Vec<String> {
        let mut missing = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![&self.root];
        while let Some(document) = stack.pop() {
            for url in document.import_urls() {
                if !visited.insert(url.to_string()) {
                    continue;
                }
                match self.documents.get(url) {
                    Some(imported) => stack.push(imported),
                    None => {
                        if !self.document_errors.contains_key(url) {
                            missing.insert(url.to_string());
                        }
                    }
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Flatten the import graph into one statement list, imported
    /// documents ahead of their importers, each document once.
    fn flatten_statements(&mut self) -> Vec<Statement> {
        let mut out = vec![];
        let mut visited = BTreeSet::new();
        let root = self.root.clone();
        self.flatten_into(&root, &mut visited, &mut out);
        out
    }

    fn flatten_into(
        &mut self,
        document: &Document,
        visited: &mut BTreeSet<String>,
        out: &mut Vec<Statement>,
    ) {
        for statement in &document.statements {
            match statement {
                Statement::Import { url, range } => {
                    if !visited.insert(url.clone()) {
                        continue;
                    }
                    if let Some(message) = self.document_errors.get(url) {
                        self.diagnostics.push(Diagnostic::error(
                            DiagnosticCode::SchemaFetchFailed,
                            format!("Could not import '{}': {}", url, message),
                            *range,
                        ));
                        continue;
                    }
                    if let Some(imported) = self.documents.get(url).cloned() {
                        self.flatten_into(&imported, visited, out);
                    }
                }
                other => out.push(other.clone()),
            }
        }
    }

    /// Physical tables the statements read that are not yet settled in
    /// the schema store. Sorted, deduped.
    fn missing_tables(&self, statements: &[Statement]) -> Vec<TableRef> {
        let mut missing = BTreeSet::new();
        for statement in statements {
            if let Statement::Source(def) = statement {
                if let SourceBase::Table(table) = &def.base {
                    if !self.store.is_settled(table) {
                        missing.insert(table.clone());
                    }
                }
            }
        }
        missing.into_iter().collect()
    }

    fn translate(&mut self, statements: &[Statement]) -> Response {
        let mut log = DiagnosticLog::new();
        for diagnostic in self.diagnostics.drain(..) {
            // Import failures recorded during flattening
            log.report(diagnostic);
        }

        let model = build_model(statements, &self.store, &self.registry, &mut log);

        let mut queries = vec![];
        for query_def in model.queries.clone() {
            let Some(pipeline) = compile_query(&query_def, &model, &mut log) else {
                continue;
            };
            if !pipeline.is_resolved() {
                continue;
            }
            match generate_sql(&pipeline, &self.registry) {
                Ok(sql) => queries.push(TranslatedQuery {
                    name: pipeline.name.clone(),
                    sql,
                    output_schema: pipeline.output_schema(),
                    pipeline,
                }),
                Err(err) => {
                    log.error(
                        DiagnosticCode::InvalidStage,
                        err.to_string(),
                        SourceRange::none(),
                    );
                }
            }
        }

        self.diagnostics = log.entries().to_vec();
        if log.has_errors() {
            tracing::debug!(errors = log.errors().count(), "translation failed");
            Response::Failed(log.into_entries())
        } else {
            tracing::debug!(queries = queries.len(), "translation complete");
            Response::Translated(Translation { model, queries })
        }
    }
}

/// Drive a translator to a terminal response, answering schema needs from
/// a provider and document needs from an optional reader. Documents read
/// this way are parsed as JSON-serialized `Document` values.
pub fn run_to_completion(
    translator: &mut Translator,
    schemas: &dyn SchemaProvider,
    documents: Option<&dyn DocumentReader>,
) -> Response {
    loop {
        match translator.advance() {
            Response::NeedsSchemas { tables } => {
                let fetch = schemas.fetch_schema(&tables);
                let mut update = Update::new();
                update.schemas = fetch.schemas;
                update.errors = fetch.errors;
                // A provider that answers nothing for a table would loop
                // forever; record the silence as a fetch failure.
                for table in tables {
                    if !update.schemas.contains_key(&table) && !update.errors.contains_key(&table) {
                        update
                            .errors
                            .insert(table, "schema provider returned no answer".to_string());
                    }
                }
                translator.update(update);
            }
            Response::NeedsDocuments { urls } => {
                let mut update = Update::new();
                for url in urls {
                    let outcome = match documents {
                        Some(reader) => reader.read_document(&url),
                        None => Err("no document reader available".to_string()),
                    };
                    match outcome {
                        Ok(text) => match serde_json::from_str::<Document>(&text) {
                            Ok(document) => {
                                update.documents.insert(url, document);
                            }
                            Err(err) => {
                                update.document_errors.insert(url, err.to_string());
                            }
                        },
                        Err(message) => {
                            update.document_errors.insert(url, message);
                        }
                    }
                }
                translator.update(update);
            }
            terminal => return terminal,
        }
    }
}
