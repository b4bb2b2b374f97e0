//! Pipeline compilation: query ASTs into compiled stages

mod compile;
mod refine;

pub use compile::{collect_required_fields, compile_query};
pub use refine::resolve_refinement;
