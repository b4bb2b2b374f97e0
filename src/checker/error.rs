//! Type checker error types

use std::fmt;

use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceRange};
use crate::model::types::DataType;
use crate::resolver::ResolveError;

/// Errors the expression type checker can produce. Each carries enough to
/// build a suggestion: `Mismatch` includes the minimal type that would have
/// been accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    /// An operand has the wrong type; `expected` is the minimal acceptable type
    Mismatch {
        expected: DataType,
        found: DataType,
        context: String,
        range: SourceRange,
    },
    /// An aggregate nested inside another aggregate without ungrouping
    IllegalAggregateNesting { range: SourceRange },
    /// A window function with no ordering context
    MissingWindowOrdering { func: String, range: SourceRange },
    /// A named query used where a value is required
    QueryAsValue { name: String, range: SourceRange },
    /// Name resolution failed inside the expression
    Resolve(ResolveError),
}

impl TypeError {
    pub fn range(&self) -> SourceRange {
        match self {
            TypeError::Mismatch { range, .. }
            | TypeError::IllegalAggregateNesting { range }
            | TypeError::MissingWindowOrdering { range, .. }
            | TypeError::QueryAsValue { range, .. } => *range,
            TypeError::Resolve(e) => e.range(),
        }
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        match self {
            TypeError::Resolve(e) => e.into_diagnostic(),
            other => {
                let range = other.range();
                let code = match &other {
                    TypeError::Mismatch { .. } | TypeError::QueryAsValue { .. } => {
                        DiagnosticCode::TypeMismatch
                    }
                    TypeError::IllegalAggregateNesting { .. } => {
                        DiagnosticCode::IllegalAggregateNesting
                    }
                    TypeError::MissingWindowOrdering { .. } => {
                        DiagnosticCode::MissingWindowOrdering
                    }
                    TypeError::Resolve(_) => unreachable!("handled above"),
                };
                Diagnostic::error(code, other.to_string(), range)
            }
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Mismatch {
                expected,
                found,
                context,
                ..
            } => {
                write!(f, "{}: expected {}, found {}", context, expected, found)
            }
            TypeError::IllegalAggregateNesting { .. } => {
                write!(
                    f,
                    "Aggregate expressions cannot be nested inside another aggregate without ungrouping"
                )
            }
            TypeError::MissingWindowOrdering { func, .. } => {
                write!(f, "Window function '{}' requires an ordering context", func)
            }
            TypeError::QueryAsValue { name, .. } => {
                write!(f, "Query '{}' cannot be used as a value", name)
            }
            TypeError::Resolve(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for TypeError {}

impl From<ResolveError> for TypeError {
    fn from(err: ResolveError) -> Self {
        TypeError::Resolve(err)
    }
}
