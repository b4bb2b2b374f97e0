//! Generator error types

use std::fmt;

/// Errors during SQL generation. These indicate the pipeline handed to the
/// generator was not fully resolved, or an internal inconsistency between
/// the compiled IR and its input struct.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateError {
    /// The pipeline has failed stages; compile diagnostics explain why
    UnresolvedQuery { name: String },
    /// IR references a field its input struct does not define
    UnknownField { path: String, input: String },
    /// The stage input has no physical relation to select from
    NoRelation { input: String },
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::UnresolvedQuery { name } => {
                write!(f, "Query '{}' has unresolved stages and cannot be generated", name)
            }
            GenerateError::UnknownField { path, input } => {
                write!(f, "Field '{}' is not defined in '{}'", path, input)
            }
            GenerateError::NoRelation { input } => {
                write!(f, "'{}' has no physical relation to read from", input)
            }
        }
    }
}

impl std::error::Error for GenerateError {}
