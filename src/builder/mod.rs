//! Struct and join building: source ASTs into resolved structs

mod build;
mod join;

pub use build::build_model;
