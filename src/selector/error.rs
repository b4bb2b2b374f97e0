//! Selector error types

use std::fmt;

use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceRange};

/// Branch selection failure
#[derive(Debug, Clone, PartialEq)]
pub enum SelectError {
    /// No branch's public field set covers the query. `missing` lists the
    /// required fields that no branch exposes, in required order.
    NoSatisfyingBranch {
        source: String,
        missing: Vec<String>,
        range: SourceRange,
    },
}

impl SelectError {
    pub fn into_diagnostic(self) -> Diagnostic {
        match &self {
            SelectError::NoSatisfyingBranch { range, .. } => {
                Diagnostic::error(DiagnosticCode::NoSatisfyingCompositeBranch, self.to_string(), *range)
            }
        }
    }
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectError::NoSatisfyingBranch {
                source, missing, ..
            } => {
                if missing.is_empty() {
                    write!(f, "No branch of '{}' satisfies this query", source)
                } else {
                    write!(
                        f,
                        "No branch of '{}' exposes [{}]",
                        source,
                        missing.join(", ")
                    )
                }
            }
        }
    }
}

impl std::error::Error for SelectError {}
