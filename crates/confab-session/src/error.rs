//! Error types for confab-session

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using confab-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a chat session
#[derive(Error, Debug)]
pub enum Error {
    /// The identity's daily quota is spent; recoverable by waiting
    #[error("Daily message limit reached, resets at {reset_at}")]
    QuotaExceeded { reset_at: DateTime<Utc> },

    /// The quota backend could not be reached; treated as exceeded
    #[error("Quota service unavailable: {0}")]
    QuotaUnavailable(String),

    /// A turn is already in flight for this session
    #[error("A message is already being processed")]
    Busy,

    /// Submitted text was empty or whitespace
    #[error("Message is empty")]
    EmptyMessage,

    /// The durable store rejected an operation or was unreachable
    #[error("Store error: {0}")]
    Store(String),

    /// Conversation or message not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Opening the generation stream failed
    #[error(transparent)]
    Stream(#[from] confab_stream::Error),

    /// The generation stream reported a failure mid-reply
    #[error("Generation failed: {0}")]
    Generation(String),
}
