use std::io;

use thiserror::Error;

/// Result type used across this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
///
/// Transport failures during an established session are not errors: they are
/// retried and finally reported as an absent response (`Ok(None)`).
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, OS, etc.).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out after exhausting every retry.
    #[error("timeout waiting for response")]
    Timeout,

    /// Peer responded with an unexpected or invalid packet.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Session activation was refused or failed verification.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// Unsupported configuration or protocol feature.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Invalid caller-supplied argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An IPMI command completed with a non-zero completion code.
    #[error("ipmi completion code: {completion_code:#04x}")]
    CompletionCode {
        /// Raw completion code returned by the BMC.
        completion_code: u8,
    },

    /// The session has been closed; no further traffic is possible.
    #[error("session is closed")]
    SessionClosed,
}

impl Error {
    /// Short, stable label for the error class (used for metrics and logs).
    #[cfg(any(feature = "tracing", feature = "metrics"))]
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Timeout => "timeout",
            Self::Protocol(_) => "protocol",
            Self::AuthenticationFailed(_) => "authentication",
            Self::Unsupported(_) => "unsupported",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::CompletionCode { .. } => "completion_code",
            Self::SessionClosed => "session_closed",
        }
    }
}
