//! SQL generation from compiled pipelines

mod error;
mod expr;
mod sql;

pub use error::GenerateError;
pub use sql::generate_sql;
