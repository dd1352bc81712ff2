//! Password mechanisms: PLAIN and LOGIN.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{Authenticator, CommandExecutor};
use crate::command::Command;
use crate::error::Result;
use crate::types::{AuthMechanism, ReplyCode};

/// SASL PLAIN (RFC 4616), sent as an initial response.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAuthenticator;

#[async_trait]
impl Authenticator for PlainAuthenticator {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Plain
    }

    async fn authenticate(&self, executor: &mut dyn CommandExecutor) -> Result<()> {
        let credentials = format!(
            "\0{}\0{}",
            executor.username().unwrap_or_default(),
            executor.password().unwrap_or_default()
        );
        let command = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(STANDARD.encode(credentials.as_bytes())),
        };
        executor
            .execute_command(command, &[ReplyCode::AUTH_SUCCESS])
            .await?;
        Ok(())
    }
}

/// SASL LOGIN: username and password each answer a `334` prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginAuthenticator;

#[async_trait]
impl Authenticator for LoginAuthenticator {
    fn mechanism(&self) -> AuthMechanism {
        AuthMechanism::Login
    }

    async fn authenticate(&self, executor: &mut dyn CommandExecutor) -> Result<()> {
        let command = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        executor
            .execute_command(command, &[ReplyCode::AUTH_CONTINUE])
            .await?;

        let username = STANDARD.encode(executor.username().unwrap_or_default());
        executor
            .execute_command(Command::AuthResponse(username), &[ReplyCode::AUTH_CONTINUE])
            .await?;

        let password = STANDARD.encode(executor.password().unwrap_or_default());
        executor
            .execute_command(Command::AuthResponse(password), &[ReplyCode::AUTH_SUCCESS])
            .await?;
        Ok(())
    }
}
