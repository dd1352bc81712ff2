//! XOAUTH2 SASL encoding.
//!
//! XOAUTH2 is the Google/Microsoft mechanism that sends a bearer token in
//! place of a password:
//! `base64("user=" user ^A "auth=Bearer " token ^A ^A)` with `^A` = 0x01.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Generates the XOAUTH2 initial response.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01` (base64 encoded)
///
/// # Example
///
/// ```
/// use relaymail_oauth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user@example.com", "eyJ0eXAi...");
/// // Send: AUTH XOAUTH2 {response}
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    let auth_string = format!("user={user}\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
}

/// Error report embedded in an XOAUTH2 failure challenge, e.g.
/// `{"status":"401","schemes":"bearer","scope":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct XOAuth2Error {
    /// HTTP-style status code.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: Option<String>,
    /// `OAuth2` scope required.
    #[serde(default)]
    pub scope: Option<String>,
}

impl XOAuth2Error {
    /// Parses a decoded challenge; `None` if it is not JSON of that shape.
    #[must_use]
    pub fn from_json(decoded: &[u8]) -> Option<Self> {
        serde_json::from_slice(decoded).ok()
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
    fn test_xoauth2_format() {
        let response = xoauth2_response("a@b.com", "T");
        let decoded = STANDARD.decode(&response).unwrap();

        assert_eq!(decoded, b"user=a@b.com\x01auth=Bearer T\x01\x01");
    }

    #[test]
    fn test_xoauth2_empty_user_keeps_keys() {
        let response = xoauth2_response("", "tok");
        let decoded = String::from_utf8(STANDARD.decode(&response).unwrap()).unwrap();

        assert_eq!(decoded, "user=\x01auth=Bearer tok\x01\x01");
    }

    #[test]
    fn test_responses_are_base64() {
        let response = xoauth2_response("user@example.com", "token");
        assert!(!response.contains("user@example.com"));
        assert!(!response.contains('\x01'));
        assert!(STANDARD.decode(&response).is_ok());
    }

    #[test]
    fn test_xoauth2_error_from_challenge() {
        let challenge =
            br#"{"status":"401","schemes":"bearer","scope":"https://outlook.office365.com/.default"}"#;
        let error = XOAuth2Error::from_json(challenge).unwrap();

        assert_eq!(error.status, "401");
        assert_eq!(error.schemes.as_deref(), Some("bearer"));
        assert_eq!(
            error.scope.as_deref(),
            Some("https://outlook.office365.com/.default")
        );
    }

    #[test]
    fn test_xoauth2_error_rejects_other_text() {
        assert!(XOAuth2Error::from_json(b"plain text").is_none());
        assert!(XOAuth2Error::from_json(br#"{"schemes":"bearer"}"#).is_none());
    }
}
