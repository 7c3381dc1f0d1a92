//! Error types for askdb-agent

use thiserror::Error;

/// Result type alias using askdb-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end an agent run
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI provider layer
    #[error(transparent)]
    Ai(#[from] askdb_ai::Error),

    /// The caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,

    /// The run used more model calls than allowed
    #[error("Exceeded the limit of {0} model calls for a single run")]
    TurnLimit(u32),

    /// A grader could not produce a verdict
    #[error("Grader '{grader}' failed: {message}")]
    Grader { grader: String, message: String },

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}
