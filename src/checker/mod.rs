//! Expression type checking

mod check;
mod error;

pub use check::{check_expr, TypedExpr};
pub use error::TypeError;
