//! The pull-based translation driver

mod driver;

pub use driver::{
    run_to_completion, Response, TranslatedQuery, Translation, Translator, Update,
};
