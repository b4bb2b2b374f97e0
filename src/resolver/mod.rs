//! Scope/symbol resolution

mod error;
mod scope;

pub use error::ResolveError;
pub use scope::{Frame, Resolved, Scope};
