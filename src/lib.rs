//! Data utilities for a question-answering model.
//!
//! - [`embedding`]: lazily loaded pretrained sentence encoder.
//! - [`word2vec`]: vocabulary building and skip-gram batch generation.

pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod word2vec;

pub use error::{Error, Result};
