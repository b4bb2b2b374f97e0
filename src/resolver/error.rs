//! Resolver error types

use std::fmt;

use crate::diagnostics::{Diagnostic, DiagnosticCode, SourceRange};

/// Errors that can occur while resolving a name against the scope chain.
/// Never fatal to the whole translation; callers convert them into
/// diagnostics and keep going.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Name is not visible in any scope
    NameNotFound { name: String, range: SourceRange },
    /// Two sibling joins expose the same unqualified name
    AmbiguousName {
        name: String,
        candidates: Vec<String>,
        range: SourceRange,
    },
    /// A declared or renamed field collides with an existing field
    NameCollision { name: String, range: SourceRange },
}

impl ResolveError {
    pub fn range(&self) -> SourceRange {
        match self {
            ResolveError::NameNotFound { range, .. }
            | ResolveError::AmbiguousName { range, .. }
            | ResolveError::NameCollision { range, .. } => *range,
        }
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        let range = self.range();
        let code = match &self {
            ResolveError::NameNotFound { .. } => DiagnosticCode::NameNotFound,
            ResolveError::AmbiguousName { .. } => DiagnosticCode::AmbiguousName,
            ResolveError::NameCollision { .. } => DiagnosticCode::NameCollision,
        };
        Diagnostic::error(code, self.to_string(), range)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::NameNotFound { name, .. } => {
                write!(f, "'{}' is not defined", name)
            }
            ResolveError::AmbiguousName {
                name, candidates, ..
            } => {
                write!(
                    f,
                    "'{}' is ambiguous; it is exposed by joins [{}]. Qualify the reference.",
                    name,
                    candidates.join(", ")
                )
            }
            ResolveError::NameCollision { name, .. } => {
                write!(f, "'{}' is already defined", name)
            }
        }
    }
}

impl std::error::Error for ResolveError {}
