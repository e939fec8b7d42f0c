//! Configuration, data model and dataset wiring for embedding fine-tuning.
//!
//! The loader reads the pre-split JSON datasets, the pair builder turns
//! generated questions into (query, passage) examples plus the aligned maps
//! used by the retrieval evaluator.

pub mod config;
pub mod dataset;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
