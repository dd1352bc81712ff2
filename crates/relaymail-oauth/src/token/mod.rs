//! Token endpoint response decoding.

use crate::error::{Result, TokenResponseError};
use serde_json::Value;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// An access token freshly issued by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct FetchedToken {
    /// Bearer access token.
    pub access_token: String,
    /// Lifetime reported by the provider, in seconds.
    pub expires_in: u64,
}

impl FetchedToken {
    /// Creates a fetched token.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
        }
    }

    /// Decodes a successful token endpoint body.
    ///
    /// Requires a JSON object with an `access_token`; `expires_in` falls back
    /// to [`DEFAULT_EXPIRES_IN`]. Other fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TokenResponseError::MissingAccessToken`] if the body is not a
    /// JSON object or lacks `access_token`.
    pub fn from_response_body(body: &[u8]) -> Result<Self> {
        let data: Value = serde_json::from_slice(body)
            .map_err(|_| TokenResponseError::MissingAccessToken)?;
        let object = data
            .as_object()
            .ok_or(TokenResponseError::MissingAccessToken)?;

        let access_token = match object.get("access_token") {
            Some(Value::String(token)) => token.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(TokenResponseError::MissingAccessToken.into()),
        };

        let expires_in = object
            .get("expires_in")
            .and_then(expires_in_seconds)
            .unwrap_or(DEFAULT_EXPIRES_IN);

        Ok(Self {
            access_token,
            expires_in,
        })
    }
}

impl std::fmt::Debug for FetchedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Azure AD v1 endpoints send `expires_in` as a numeric string.
fn expires_in_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|secs| u64::try_from(secs).unwrap_or(0))),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
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
    use crate::Error;

    #[test]
    fn test_decode_full_response() {
        let token = FetchedToken::from_response_body(
            br#"{"token_type":"Bearer","expires_in":3599,"ext_expires_in":3599,"access_token":"eyJ0"}"#,
        )
        .unwrap();
        assert_eq!(token, FetchedToken::new("eyJ0", 3599));
    }

    #[test]
    fn test_missing_expires_in_defaults() {
        let token = FetchedToken::from_response_body(br#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(token.expires_in, DEFAULT_EXPIRES_IN);
    }

    #[test]
    fn test_string_expires_in() {
        let token =
            FetchedToken::from_response_body(br#"{"access_token":"abc","expires_in":"120"}"#)
                .unwrap();
        assert_eq!(token.expires_in, 120);
    }

    #[test]
    fn test_missing_access_token() {
        let err = FetchedToken::from_response_body(br#"{"foo":"bar"}"#).unwrap_err();
        assert!(matches!(
            err,
            Error::Response(TokenResponseError::MissingAccessToken)
        ));
    }

    #[test]
    fn test_null_access_token_is_missing() {
        assert!(FetchedToken::from_response_body(br#"{"access_token":null}"#).is_err());
    }

    #[test]
    fn test_non_object_body() {
        assert!(FetchedToken::from_response_body(br#""just a string""#).is_err());
        assert!(FetchedToken::from_response_body(b"<html>").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = FetchedToken::new("super-secret", 10);
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("expires_in: 10"));
    }
}
