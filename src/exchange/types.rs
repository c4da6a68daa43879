//! Exchange types

use thiserror::Error;

/// Remote exchange errors
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success API response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    /// Response could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}
