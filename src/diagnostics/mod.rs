//! Diagnostics: accumulated, source-located problem reports
//!
//! Translation never fail-fasts. Every component pushes `Diagnostic`s into a
//! shared `DiagnosticLog` and keeps going, so a caller sees the full error
//! set for a document in one pass. Translation is failed iff at least one
//! error-severity entry exists; warnings and infos never block a `Model`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in a source document (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Position { line, column }
    }
}

/// A half-open range in a source document, attached to every AST node
/// so diagnostics can point at the offending text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: Position,
    pub end: Position,
}

impl SourceRange {
    pub fn new(start: Position, end: Position) -> Self {
        SourceRange { start, end }
    }

    /// A zero range, used by programmatically-built AST nodes
    pub fn none() -> Self {
        SourceRange::default()
    }

    pub fn span(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        SourceRange {
            start: Position::new(start_line, start_col),
            end: Position::new(end_line, end_col),
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

/// Severity of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warn => write!(f, "warn"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Stable machine-readable classification of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticCode {
    NameNotFound,
    AmbiguousName,
    NameCollision,
    TypeMismatch,
    IllegalAggregateNesting,
    MissingWindowOrdering,
    JoinKeyInvalid,
    NoSatisfyingCompositeBranch,
    SchemaFetchFailed,
    CircularSourceDefinition,
    InvalidStage,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticCode::NameNotFound => "name-not-found",
            DiagnosticCode::AmbiguousName => "ambiguous-name",
            DiagnosticCode::NameCollision => "name-collision",
            DiagnosticCode::TypeMismatch => "type-mismatch",
            DiagnosticCode::IllegalAggregateNesting => "illegal-aggregate-nesting",
            DiagnosticCode::MissingWindowOrdering => "missing-window-ordering",
            DiagnosticCode::JoinKeyInvalid => "join-key-invalid",
            DiagnosticCode::NoSatisfyingCompositeBranch => "no-satisfying-composite-branch",
            DiagnosticCode::SchemaFetchFailed => "schema-fetch-failed",
            DiagnosticCode::CircularSourceDefinition => "circular-source-definition",
            DiagnosticCode::InvalidStage => "invalid-stage",
        };
        write!(f, "{}", name)
    }
}

/// One problem report, located in the source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub range: SourceRange,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>, range: SourceRange) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code,
            message: message.into(),
            range,
        }
    }

    pub fn warn(code: DiagnosticCode, message: impl Into<String>, range: SourceRange) -> Self {
        Diagnostic {
            severity: Severity::Warn,
            code,
            message: message.into(),
            range,
        }
    }

    pub fn info(code: DiagnosticCode, message: impl Into<String>, range: SourceRange) -> Self {
        Diagnostic {
            severity: Severity::Info,
            code,
            message: message.into(),
            range,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] at {}: {}",
            self.severity, self.code, self.range, self.message
        )
    }
}

/// Accumulator shared across all translation phases
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticLog {
    entries: Vec<Diagnostic>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        DiagnosticLog::default()
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, code: DiagnosticCode, message: impl Into<String>, range: SourceRange) {
        self.report(Diagnostic::error(code, message, range));
    }

    pub fn warn(&mut self, code: DiagnosticCode, message: impl Into<String>, range: SourceRange) {
        self.report(Diagnostic::warn(code, message, range));
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry is error-severity. Warnings never fail a translation.
    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_collects_in_order() {
        let mut log = DiagnosticLog::new();
        log.error(DiagnosticCode::NameNotFound, "no 'x'", SourceRange::none());
        log.warn(DiagnosticCode::NameCollision, "shadowed 'y'", SourceRange::none());

        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.entries()[0].code, DiagnosticCode::NameNotFound);
        assert_eq!(log.entries()[1].severity, Severity::Warn);
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let mut log = DiagnosticLog::new();
        log.warn(DiagnosticCode::NameCollision, "shadowed", SourceRange::none());
        assert!(!log.has_errors());

        log.error(DiagnosticCode::TypeMismatch, "boom", SourceRange::none());
        assert!(log.has_errors());
        assert_eq!(log.errors().count(), 1);
    }

    #[test]
    fn test_display() {
        let d = Diagnostic::error(
            DiagnosticCode::TypeMismatch,
            "expected number",
            SourceRange::span(3, 5, 3, 9),
        );
        assert_eq!(d.to_string(), "error [type-mismatch] at 3:5-3:9: expected number");
    }

    #[test]
    fn test_serde_severity() {
        let json = serde_json::to_string(&Severity::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
    }
}
