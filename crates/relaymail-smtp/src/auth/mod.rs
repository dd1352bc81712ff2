//! SASL authentication seams.
//!
//! An [`Authenticator`] drives one mechanism over a [`CommandExecutor`], which
//! the SMTP session provides while the connection is in the authentication
//! phase. Authenticators are stateless and can be shared between transports.

mod password;

pub use password::{LoginAuthenticator, PlainAuthenticator};

use async_trait::async_trait;

use crate::command::Command;
use crate::error::Result;
use crate::types::{AuthMechanism, Reply, ReplyCode};

/// Session side of a SASL exchange.
#[async_trait]
pub trait CommandExecutor: Send {
    /// Username configured on the transport, if any.
    fn username(&self) -> Option<&str>;

    /// Password configured on the transport, if any.
    fn password(&self) -> Option<&str>;

    /// Sends `command` and returns the reply if its code is in `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnexpectedReply`](crate::Error::UnexpectedReply) for
    /// any other code. An `AUTH` command answered with an unexpected `334`
    /// challenge is cancelled with an empty line first; the error then
    /// carries the final code and the decoded challenge.
    async fn execute_command(&mut self, command: Command, expected: &[ReplyCode]) -> Result<Reply>;
}

/// One SASL mechanism.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Mechanism this authenticator implements.
    fn mechanism(&self) -> AuthMechanism;

    /// Runs the exchange.
    ///
    /// # Errors
    ///
    /// Returns the executor's error when the server rejects a step, or
    /// [`Error::Auth`](crate::Error::Auth) when a collaborator fails.
    async fn authenticate(&self, executor: &mut dyn CommandExecutor) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::{Command, CommandExecutor, Reply, ReplyCode, Result, async_trait};
    use crate::Error;

    /// Executor that replays canned replies and records what was sent.
    #[derive(Debug, Default)]
    pub struct ScriptedExecutor {
        pub username: Option<String>,
        pub password: Option<String>,
        pub replies: VecDeque<u16>,
        pub sent: Vec<Vec<u8>>,
    }

    impl ScriptedExecutor {
        pub fn new(username: &str, password: &str, replies: &[u16]) -> Self {
            Self {
                username: Some(username.to_string()),
                password: Some(password.to_string()),
                replies: replies.iter().copied().collect(),
                sent: Vec::new(),
            }
        }

        pub fn sent_lines(&self) -> Vec<String> {
            self.sent
                .iter()
                .map(|line| String::from_utf8_lossy(line).trim_end().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        fn username(&self) -> Option<&str> {
            self.username.as_deref()
        }

        fn password(&self) -> Option<&str> {
            self.password.as_deref()
        }

        async fn execute_command(
            &mut self,
            command: Command,
            expected: &[ReplyCode],
        ) -> Result<Reply> {
            self.sent.push(command.serialize());
            let code = ReplyCode::new(self.replies.pop_front().ok_or(Error::ConnectionClosed)?);
            if expected.contains(&code) {
                Ok(Reply::new(code, vec![String::new()]))
            } else {
                Err(Error::UnexpectedReply {
                    expected: String::new(),
                    code,
                    message: String::new(),
                    challenge: None,
                })
            }
        }
    }
}
