//! Error types for the mailer facade.

/// Result type alias for mailer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Mailer facade errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mailer configuration is missing or unusable.
    #[error("{0}")]
    Config(String),

    /// Transport, DSN or delivery failure.
    #[error(transparent)]
    Smtp(#[from] relaymail_smtp::Error),

    /// Token acquisition failure outside an SMTP session.
    #[error(transparent)]
    OAuth(#[from] relaymail_oauth::Error),

    /// Settings file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid JSON.
    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Token error behind this error, whether raised directly or during
    /// SMTP authentication.
    #[must_use]
    pub fn token_error(&self) -> Option<&relaymail_oauth::Error> {
        match self {
            Self::OAuth(e) => Some(e),
            Self::Smtp(relaymail_smtp::Error::Auth(source)) => source.downcast_ref(),
            _ => None,
        }
    }
}
