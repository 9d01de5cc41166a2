//! Error types for mesh-arbiter

use thiserror::Error;

/// Errors an arbitration call can end in.
///
/// None of these are fatal to the caller: the tiered filter degrades to its
/// heuristic on any of them.
#[derive(Error, Debug)]
pub enum ArbiterError {
    /// No arbitration backend is configured or reachable
    #[error("arbiter unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its time budget
    #[error("arbiter timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Transport or status error from the HTTP endpoint
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response could not be turned into verdicts
    #[error("malformed arbiter response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ArbiterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ArbiterError::Http(format!("request timed out: {err}"))
        } else {
            ArbiterError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ArbiterError {
    fn from(err: serde_json::Error) -> Self {
        ArbiterError::Malformed(err.to_string())
    }
}
