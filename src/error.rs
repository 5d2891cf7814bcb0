//! Crate-wide error type.
//!
//! Mirrors the errno-compatible classification the adapter is specified
//! against: a transient "would block", a fatal protocol error, a fatal I/O
//! error, and two configuration-time errors. Nothing here is recovered
//! internally except the bootstrap flow's deliberate `Protocol`-to-reconnect
//! convention (see [`crate::bootstrap`]).

use std::io;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the TLS transport adapter.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The operation would block; retry once the direction named by the
    /// stream's `rx_want`/`tx_want` becomes ready.
    #[error("operation would block")]
    WouldBlock,

    /// A fatal protocol-level failure: handshake failure, unexpected
    /// close, bootstrap rejection, or a malformed certificate chain.
    #[error("TLS protocol error: {0}")]
    Protocol(String),

    /// A fatal underlying I/O failure (not a would-block).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A required credential is missing, or the key and certificate do not
    /// correspond to each other.
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// Construction of the DH/group-preference cache failed. Treated as
    /// fatal; callers should abort rather than retry.
    #[error("fatal initialization error: {0}")]
    Fatal(String),
}

impl Error {
    /// True if this error represents a transient would-block condition.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Error {
        Error::Protocol(msg.into())
    }

    pub(crate) fn fatal(msg: impl Into<String>) -> Error {
        Error::Fatal(msg.into())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}
