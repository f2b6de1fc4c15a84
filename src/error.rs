//! Error types shared by the embedding accessor and the skip-gram builder.

use thiserror::Error;

/// Errors raised by this crate.
///
/// Nothing here is recovered locally: every variant propagates to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// The external sentence encoder could not be fetched or constructed.
    #[error("sentence encoder unavailable: {0}")]
    ResourceUnavailable(String),

    /// Input to the embedding function could not be coerced to strings.
    #[error("type conversion failed: {0}")]
    TypeConversion(String),

    /// The encoder failed or returned vectors of an unexpected shape.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// A parameter contract was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The data is too short for the requested window.
    #[error("index out of range: needed {needed} elements, data has {len}")]
    IndexOutOfRange { needed: usize, len: usize },

    /// A global logger was already installed, so records would not reach the log file.
    #[error("logger setup failed: {0}")]
    Logger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
