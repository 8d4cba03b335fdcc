use std::io;

use thiserror::Error;

use crate::transaction::{TransactionKey, TransactionKind, TransactionState};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP transaction handling
#[derive(Error, Debug)]
pub enum Error {
    /// Error originating from the message model (building requests/responses).
    #[error("SIP core error: {0}")]
    SipCoreError(#[from] sipline_sip_core::Error),

    /// Error reported by the transport layer while sending.
    #[error("SIP transport error: {0}")]
    TransportError(String),

    /// Transaction not found for the given key.
    #[error("Transaction not found: {0:?}")]
    TransactionNotFound(TransactionKey),

    /// Transaction with the given key already exists.
    #[error("Transaction already exists: {0:?}")]
    TransactionExists(TransactionKey),

    /// Invalid transaction state transition attempted.
    #[error("Invalid transaction state transition: {0}")]
    InvalidStateTransition(String),

    /// Transaction timed out (Timer B, F, or H).
    #[error("Transaction timed out: {0}")]
    TransactionTimeout(TransactionKey),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal channel error (e.g., receiver dropped).
    #[error("Internal channel closed")]
    ChannelClosed,

    /// Other miscellaneous errors.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Wraps a transport failure with context about what was being sent.
    pub fn transport_error(source: impl std::fmt::Display, context: &str) -> Self {
        Error::TransportError(format!("{}: {}", context, source))
    }

    /// Builds an `InvalidStateTransition` with the full transition description.
    pub fn invalid_state_transition(
        kind: TransactionKind,
        from: TransactionState,
        to: TransactionState,
        key: Option<TransactionKey>,
    ) -> Self {
        match key {
            Some(key) => Error::InvalidStateTransition(format!(
                "{:?}: {:?} -> {:?} (transaction {})",
                kind, from, to, key
            )),
            None => Error::InvalidStateTransition(format!("{:?}: {:?} -> {:?}", kind, from, to)),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}
