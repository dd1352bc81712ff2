//! Error types for SMTP operations.

use std::io;

use crate::types::ReplyCode;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error raised by an authenticator's own collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server closed the connection mid-reply.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Server answered with a code the command did not expect.
    #[error("Expected response code {expected} but got code {code}, with message \"{message}\"")]
    UnexpectedReply {
        /// Accepted codes, comma separated.
        expected: String,
        /// Code actually received.
        code: ReplyCode,
        /// Server message.
        message: String,
        /// Decoded `334` challenge that preceded the final reply, if any.
        challenge: Option<String>,
    },

    /// Every advertised authenticator was rejected by the server.
    #[error("Failed to authenticate as \"{username}\" using: {mechanisms}")]
    AuthFailed {
        /// Username presented.
        username: String,
        /// Mechanisms attempted, comma separated.
        mechanisms: String,
        /// Rejection of the last attempt.
        #[source]
        last: Box<Self>,
    },

    /// Authenticator collaborator failure (e.g. token acquisition).
    #[error("Authentication aborted: {0}")]
    Auth(#[source] BoxError),

    /// Protocol error (unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Malformed connection string.
    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    /// No transport factory accepts the DSN scheme.
    #[error("The \"{0}\" scheme is not supported")]
    UnsupportedScheme(String),

    /// Message cannot be sent as built.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large.
    #[error("Message exceeds size limit: {0} bytes")]
    MessageTooLarge(usize),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Wraps an authenticator collaborator error.
    #[must_use]
    pub fn auth(source: impl Into<BoxError>) -> Self {
        Self::Auth(source.into())
    }

    /// Reply code carried by the error, if the server produced one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            Self::UnexpectedReply { code, .. } => Some(code.as_u16()),
            _ => None,
        }
    }

    /// Returns true if the server refused the command (as opposed to a local
    /// or transport failure).
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        self.code().is_some()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500 && code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 400 && code < 500)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_reply_message() {
        let err = Error::UnexpectedReply {
            expected: "235".into(),
            code: ReplyCode::AUTH_FAILED,
            message: "5.7.3 Authentication unsuccessful".into(),
            challenge: None,
        };
        assert_eq!(
            err.to_string(),
            "Expected response code 235 but got code 535, with message \"5.7.3 Authentication unsuccessful\""
        );
        assert!(err.is_rejection());
        assert!(err.is_permanent());
    }

    #[test]
    fn test_transport_failures_are_not_rejections() {
        assert!(!Error::ConnectionClosed.is_rejection());
        assert!(!Error::auth("token endpoint down").is_rejection());
        assert!(Error::smtp_error(451, "try later").is_transient());
    }

    #[test]
    fn test_auth_source_is_downcastable() {
        let err = Error::auth(io::Error::other("boom"));
        let Error::Auth(source) = &err else {
            panic!("expected Auth variant");
        };
        assert!(source.downcast_ref::<io::Error>().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }
}
