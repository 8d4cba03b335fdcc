//! Error types for the SIP message model.

use thiserror::Error;

/// Errors produced when constructing or converting SIP model types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A numeric status code outside the 100..=699 range.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A URI that does not follow the sip:/sips: shape this model accepts.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// A malformed header value.
    #[error("invalid header value: {0}")]
    InvalidHeader(String),

    /// A method token that is empty or contains illegal characters.
    #[error("invalid method: {0}")]
    InvalidMethod(String),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
