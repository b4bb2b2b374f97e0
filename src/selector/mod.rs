//! Composite branch selection

mod error;
mod select;

pub use error::SelectError;
pub use select::select_branch;
