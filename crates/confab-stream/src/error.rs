//! Error types for confab-stream

use thiserror::Error;

/// Result type alias using confab-stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when opening a completion stream
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),
}
