//! Error types for token acquisition.

use std::fmt;
use std::io;

use serde_json::Value;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token endpoint answered with a non-2xx status.
    #[error(transparent)]
    Request(#[from] TokenRequestError),

    /// Token endpoint answered 2xx with an unusable body.
    #[error(transparent)]
    Response(#[from] TokenResponseError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token cache error.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Returns the HTTP status of a failed token request, if this is one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Request(err) => Some(err.status()),
            _ => None,
        }
    }
}

/// The token endpoint rejected the request.
///
/// Carries the HTTP status and whichever diagnostics the identity provider
/// returned. A field the provider did not send is `None`, never an empty
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequestError {
    message: String,
    status: u16,
    error: Option<String>,
    error_description: Option<String>,
    error_codes: Option<Vec<Value>>,
    trace_id: Option<String>,
    correlation_id: Option<String>,
    timestamp: Option<String>,
    error_uri: Option<String>,
}

impl TokenRequestError {
    /// Builds the error from a non-2xx status and the raw response body.
    ///
    /// A body that is not a JSON object leaves every diagnostic field empty.
    #[must_use]
    pub fn from_http(status: u16, body: &[u8]) -> Self {
        let decoded = serde_json::from_slice::<Value>(body).ok();
        let object = decoded.as_ref().and_then(Value::as_object);

        let field = |name: &str| object.and_then(|map| map.get(name)).and_then(value_as_string);

        let error = field("error");
        let error_description = field("error_description");
        let error_codes = object
            .and_then(|map| map.get("error_codes"))
            .and_then(Value::as_array)
            .cloned();

        // Blank and "0" fields carry no diagnostic.
        let meaningful = |value: Option<&str>| value.is_some_and(|v| !v.is_empty() && v != "0");
        let message = if meaningful(error.as_deref()) || meaningful(error_description.as_deref()) {
            let short = format!(
                "{}: {}",
                error.as_deref().unwrap_or("error"),
                error_description.as_deref().unwrap_or_default()
            );
            format!(
                "OAuth token request failed (HTTP {status}) - {}",
                short.trim()
            )
        } else {
            format!("OAuth token request failed (HTTP {status}).")
        };

        Self {
            message,
            status,
            error,
            error_description,
            error_codes,
            trace_id: field("trace_id"),
            correlation_id: field("correlation_id"),
            timestamp: field("timestamp"),
            error_uri: field("error_uri"),
        }
    }

    /// Human-readable summary, suitable for logs.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code returned by the token endpoint.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// `OAuth2` error code (e.g. `invalid_client`).
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Provider description of the error.
    #[must_use]
    pub fn error_description(&self) -> Option<&str> {
        self.error_description.as_deref()
    }

    /// Provider-specific sub-error codes (`AADSTS` numbers for Entra ID).
    #[must_use]
    pub fn error_codes(&self) -> Option<&[Value]> {
        self.error_codes.as_deref()
    }

    /// Provider trace identifier.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Provider correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Provider timestamp of the failure.
    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp.as_deref()
    }

    /// Documentation link for the error.
    #[must_use]
    pub fn error_uri(&self) -> Option<&str> {
        self.error_uri.as_deref()
    }
}

impl fmt::Display for TokenRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TokenRequestError {}

/// The token endpoint answered 2xx but the body is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenResponseError {
    /// Body is not a JSON object or has no `access_token`.
    #[error("OAuth token response is invalid: missing access_token.")]
    MissingAccessToken,
}

/// Errors raised by token cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backing store I/O failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backing store holds malformed data.
    #[error("cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A lock guarding the cache was poisoned by a panicking writer.
    #[error("cache lock poisoned")]
    Poisoned,

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Scalar JSON values are rendered as strings; null, arrays and objects are absent.
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_non_json_body_has_no_diagnostics() {
        let err = TokenRequestError::from_http(400, b"bad request");

        assert_eq!(err.status(), 400);
        assert_eq!(err.message(), "OAuth token request failed (HTTP 400).");
        assert!(err.error().is_none());
        assert!(err.error_description().is_none());
        assert!(err.error_codes().is_none());
        assert!(err.trace_id().is_none());
        assert!(err.correlation_id().is_none());
        assert!(err.timestamp().is_none());
        assert!(err.error_uri().is_none());
    }

    #[test]
    fn test_entra_error_body() {
        let body = br#"{
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided.",
            "error_codes": [7000215],
            "timestamp": "2024-05-01 10:00:00Z",
            "trace_id": "0a1b",
            "correlation_id": "c0ffee",
            "error_uri": "https://login.microsoftonline.com/error?code=7000215"
        }"#;
        let err = TokenRequestError::from_http(401, body);

        assert_eq!(
            err.to_string(),
            "OAuth token request failed (HTTP 401) - invalid_client: AADSTS7000215: Invalid client secret provided."
        );
        assert_eq!(err.error(), Some("invalid_client"));
        assert_eq!(err.error_codes().unwrap(), &[Value::from(7_000_215)]);
        assert_eq!(err.trace_id(), Some("0a1b"));
        assert_eq!(err.correlation_id(), Some("c0ffee"));
        assert_eq!(err.timestamp(), Some("2024-05-01 10:00:00Z"));
        assert_eq!(
            err.error_uri(),
            Some("https://login.microsoftonline.com/error?code=7000215")
        );
    }

    #[test]
    fn test_error_without_description_is_trimmed() {
        let err = TokenRequestError::from_http(400, br#"{"error":"invalid_scope"}"#);
        assert_eq!(
            err.message(),
            "OAuth token request failed (HTTP 400) - invalid_scope:"
        );
        assert!(err.error_description().is_none());
    }

    #[test]
    fn test_description_without_error_code() {
        let err = TokenRequestError::from_http(503, br#"{"error_description":"try later"}"#);
        assert_eq!(
            err.message(),
            "OAuth token request failed (HTTP 503) - error: try later"
        );
        assert!(err.error().is_none());
    }

    #[test]
    fn test_empty_string_is_kept_distinct_from_absent() {
        let err = TokenRequestError::from_http(400, br#"{"error":"", "trace_id":""}"#);
        assert_eq!(err.error(), Some(""));
        assert_eq!(err.trace_id(), Some(""));
        assert!(err.correlation_id().is_none());
        assert_eq!(err.message(), "OAuth token request failed (HTTP 400).");
    }

    #[test]
    fn test_blank_error_with_description() {
        let err = TokenRequestError::from_http(400, br#"{"error":"","error_description":"bad scope"}"#);
        assert_eq!(err.message(), "OAuth token request failed (HTTP 400) - : bad scope");
    }

    #[test]
    fn test_json_array_body_has_no_diagnostics() {
        let err = TokenRequestError::from_http(500, b"[1,2,3]");
        assert_eq!(err.message(), "OAuth token request failed (HTTP 500).");
    }

    #[test]
    fn test_response_error_message() {
        assert_eq!(
            TokenResponseError::MissingAccessToken.to_string(),
            "OAuth token response is invalid: missing access_token."
        );
    }

    #[test]
    fn test_status_accessor() {
        let err = Error::from(TokenRequestError::from_http(429, b""));
        assert_eq!(err.status(), Some(429));
        assert_eq!(Error::InvalidConfig("x".into()).status(), None);
    }
}
