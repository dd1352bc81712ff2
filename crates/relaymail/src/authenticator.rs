//! XOAUTH2 authenticator backed by the token provider.

use std::sync::Arc;

use async_trait::async_trait;
use relaymail_oauth::TokenProvider;
use relaymail_oauth::sasl::{XOAuth2Error, xoauth2_response};
use relaymail_smtp::command::Command;
use relaymail_smtp::{AuthMechanism, Authenticator, CommandExecutor, ReplyCode};

/// Authenticates an SMTP session with a client-credentials access token.
///
/// The token is requested before `AUTH XOAUTH2` is sent; a token failure
/// aborts the session without touching the server.
#[derive(Debug, Clone)]
pub struct XOAuth2Authenticator {
    tokens: Arc<TokenProvider>,
}

impl XOAuth2Authenticator {
    /// Creates an authenticator drawing tokens from `tokens`.
    #[must_use]
    pub const fn new(tokens: Arc<TokenProvider>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for XOAuth2Authenticator {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::XOAuth2
    }

    async fn authenticate(&self, executor: &mut dyn CommandExecutor) -> relaymail_smtp::Result<()> {
        let username = executor.username().unwrap_or_default().to_string();
        let token = self
            .tokens
            .get_token()
            .await
            .map_err(relaymail_smtp::Error::auth)?;

        let command = Command::Auth {
            mechanism: AuthMechanism::XOAuth2,
            initial_response: Some(xoauth2_response(&username, &token)),
        };
        let result = executor
            .execute_command(command, &[ReplyCode::AUTH_SUCCESS])
            .await;

        if let Err(relaymail_smtp::Error::UnexpectedReply {
            challenge: Some(challenge),
            ..
        }) = &result
        {
            match XOAuth2Error::from_json(challenge.as_bytes()) {
                Some(report) => tracing::debug!(
                    status = %report.status,
                    scope = report.scope.as_deref().unwrap_or_default(),
                    "XOAUTH2 rejected"
                ),
                None => tracing::debug!(%challenge, "XOAUTH2 rejected"),
            }
        }

        result.map(|_| ())
    }
}
