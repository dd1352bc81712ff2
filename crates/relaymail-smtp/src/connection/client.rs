//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::auth::{Authenticator, CommandExecutor};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, Extension, Reply, ReplyCode};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(greeting.into_error());
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "SMTP greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let cmd = Command::Ehlo {
            hostname: client_hostname.to_string(),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(reply.into_error());
        }

        // First line is the server greeting, the rest are extensions.
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS and repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, server_hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(reply.into_error());
        }

        self.stream = self.stream.upgrade_to_tls(server_hostname).await?;
        tracing::debug!(server = server_hostname, "STARTTLS negotiated");

        // Capabilities must be rediscovered on the protected channel.
        self.ehlo(client_hostname).await
    }

    /// Authenticates with the first authenticator the server accepts.
    ///
    /// Only authenticators whose mechanism the server advertises are tried,
    /// in the given order. A server rejection resets the session (`RSET`)
    /// and moves on to the next candidate; any other error ends the attempt
    /// and is returned as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if no authenticator matches the
    /// advertised mechanisms, [`Error::AuthFailed`] if every candidate was
    /// rejected, or the first non-rejection error.
    pub async fn authenticate(
        mut self,
        authenticators: &[Arc<dyn Authenticator>],
        username: &str,
        password: Option<&str>,
    ) -> Result<Client<Authenticated>> {
        let advertised = self.server_info.auth_mechanisms();
        let candidates: Vec<&Arc<dyn Authenticator>> = authenticators
            .iter()
            .filter(|auth| advertised.contains(&auth.mechanism()))
            .collect();

        if candidates.is_empty() {
            let offered: Vec<&str> = advertised.iter().map(|m| m.as_str()).collect();
            return Err(Error::NotSupported(format!(
                "any configured authentication mechanism (server offers: {})",
                offered.join(", ")
            )));
        }

        let mut tried = Vec::with_capacity(candidates.len());
        let mut last_rejection = None;
        for authenticator in candidates {
            let mechanism = authenticator.mechanism();
            tried.push(mechanism.as_str());

            let mut exchange = AuthExchange {
                stream: &mut self.stream,
                username,
                password,
            };
            match authenticator.authenticate(&mut exchange).await {
                Ok(()) => {
                    tracing::debug!(%mechanism, username, "SMTP authentication succeeded");
                    return Ok(self.into_state());
                }
                Err(e) if e.is_rejection() => {
                    tracing::debug!(%mechanism, error = %e, "SMTP authentication rejected");
                    let reply = self.send_command(Command::Rset).await?;
                    if !reply.is_success() {
                        return Err(reply.into_error());
                    }
                    last_rejection = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::AuthFailed {
            username: username.to_string(),
            mechanisms: tried.join(", "),
            last: Box::new(last_rejection.unwrap_or(Error::ConnectionClosed)),
        })
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: usize) -> Result<Client<MailTransaction>> {
        self.begin_transaction(from, size).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: usize) -> Result<Client<MailTransaction>> {
        self.begin_transaction(from, size).await
    }
}

impl Client<MailTransaction> {
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.add_recipient(to).await?;
        Ok(self.into_state())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.add_recipient(to).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(reply.into_error());
        }

        Ok(self.into_state())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted. Line endings will be normalized to CRLF.
    /// The terminating "." line will be added automatically.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        let message = message.strip_suffix(b"\n").unwrap_or(message);
        let mut payload = Vec::with_capacity(message.len() + 64);
        for line in message.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            // Dot-stuffing (RFC 5321 section 4.5.2)
            if line.first() == Some(&b'.') {
                payload.push(b'.');
            }
            payload.extend_from_slice(line);
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b".\r\n");
        self.stream.write_all(&payload).await?;

        let reply = read_reply(&mut self.stream).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }

        Ok(self.into_state())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        exchange(&mut self.stream, cmd).await
    }

    fn into_state<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    async fn begin_transaction(
        mut self,
        from: Address,
        size: usize,
    ) -> Result<Client<MailTransaction>> {
        if let Some(limit) = self.server_info.max_message_size()
            && limit > 0
            && size > limit
        {
            return Err(Error::MessageTooLarge(size));
        }

        let eight_bit = self.server_info.supports(&Extension::EightBitMime);
        let cmd = Command::MailFrom {
            from,
            body: eight_bit.then(|| "8BITMIME".to_string()),
            size: self.server_info.max_message_size().map(|_| size),
        };
        let reply = self.send_command(cmd).await?;

        if !reply.is_success() {
            return Err(reply.into_error());
        }

        Ok(self.into_state())
    }

    async fn add_recipient(&mut self, to: Address) -> Result<()> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }
        Ok(())
    }

    /// Abandons the current transaction (`RSET`), available in any state.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Connected>> {
        let reply = self.send_command(Command::Rset).await?;

        if !reply.is_success() {
            return Err(reply.into_error());
        }

        Ok(self.into_state())
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if reply.code != ReplyCode::CLOSING {
            return Err(reply.into_error());
        }

        Ok(())
    }
}

async fn exchange(stream: &mut SmtpStream, cmd: Command) -> Result<Reply> {
    tracing::trace!(command = cmd.verb(), "SMTP >");
    stream.write_all(&cmd.serialize()).await?;
    let reply = read_reply(stream).await?;
    tracing::trace!(code = %reply.code, "SMTP <");
    Ok(reply)
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

/// Session handed to authenticators during [`Client::authenticate`].
struct AuthExchange<'a> {
    stream: &'a mut SmtpStream,
    username: &'a str,
    password: Option<&'a str>,
}

#[async_trait]
impl CommandExecutor for AuthExchange<'_> {
    fn username(&self) -> Option<&str> {
        Some(self.username)
    }

    fn password(&self) -> Option<&str> {
        self.password
    }

    async fn execute_command(&mut self, command: Command, expected: &[ReplyCode]) -> Result<Reply> {
        let is_auth = matches!(command, Command::Auth { .. });
        let reply = exchange(self.stream, command).await?;
        if expected.contains(&reply.code) {
            return Ok(reply);
        }

        if is_auth && reply.code == ReplyCode::AUTH_CONTINUE {
            // The server wants more; an empty line cancels and yields the
            // final verdict.
            let challenge = decode_challenge(&reply.message_text());
            let last = exchange(self.stream, Command::AuthResponse(String::new())).await?;
            if expected.contains(&last.code) {
                return Ok(last);
            }
            return Err(unexpected(expected, last, Some(challenge)));
        }

        Err(unexpected(expected, reply, None))
    }
}

fn decode_challenge(text: &str) -> String {
    STANDARD
        .decode(text.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| text.to_string())
}

fn unexpected(expected: &[ReplyCode], reply: Reply, challenge: Option<String>) -> Error {
    let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    Error::UnexpectedReply {
        expected: expected.join(", "),
        code: reply.code,
        message: reply.message_text(),
        challenge,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::{LoginAuthenticator, PlainAuthenticator};
    use crate::types::AuthMechanism;
    use tokio_test::io::Builder;

    const GREETING: &[u8] = b"220 mx.example.com ESMTP\r\n";
    const EHLO: &[u8] = b"EHLO client.test\r\n";

    async fn ready(mock: tokio_test::io::Mock) -> Client<Connected> {
        Client::from_stream(SmtpStream::from_io(mock))
            .await
            .unwrap()
            .ehlo("client.test")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ehlo_collects_extensions() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250-SIZE 1000\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n")
            .build();
        let client = ready(mock).await;

        let info = client.server_info();
        assert_eq!(info.hostname, "mx.example.com");
        assert_eq!(info.max_message_size(), Some(1000));
        assert_eq!(
            info.auth_mechanisms(),
            vec![AuthMechanism::Plain, AuthMechanism::Login]
        );
        assert!(!info.supports_starttls());
    }

    #[tokio::test]
    async fn test_bad_greeting_is_an_error() {
        let mock = Builder::new().read(b"554 go away\r\n").build();
        let err = Client::from_stream(SmtpStream::from_io(mock))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(554));
    }

    #[tokio::test]
    async fn test_rejected_mechanism_falls_through_after_rset() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(b"535 5.7.8 nope\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cGFzcw==\r\n")
            .read(b"235 2.7.0 ok\r\n")
            .build();
        let authenticators: Vec<Arc<dyn Authenticator>> =
            vec![Arc::new(PlainAuthenticator), Arc::new(LoginAuthenticator)];

        ready(mock)
            .await
            .authenticate(&authenticators, "user", Some("pass"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_advertised_candidate() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250 AUTH XOAUTH2\r\n")
            .build();
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(PlainAuthenticator)];

        let err = ready(mock)
            .await
            .authenticate(&authenticators, "user", Some("pass"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_all_rejected_reports_mechanisms() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n")
            .read(b"535 5.7.8 nope\r\n")
            .write(b"RSET\r\n")
            .read(b"250 OK\r\n")
            .build();
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(PlainAuthenticator)];

        let err = ready(mock)
            .await
            .authenticate(&authenticators, "user", Some("pass"))
            .await
            .unwrap_err();
        let Error::AuthFailed { mechanisms, last, .. } = err else {
            panic!("expected AuthFailed");
        };
        assert_eq!(mechanisms, "PLAIN");
        assert_eq!(last.code(), Some(535));
    }

    #[tokio::test]
    async fn test_unexpected_challenge_is_cancelled() {
        let challenge = STANDARD.encode(r#"{"status":"401"}"#);
        let mock = Builder::new()
            .write(b"AUTH PLAIN AA==\r\n")
            .read(format!("334 {challenge}\r\n").as_bytes())
            .write(b"\r\n")
            .read(b"535 5.7.3 Authentication unsuccessful\r\n")
            .build();
        let mut stream = SmtpStream::from_io(mock);
        let mut exchange = AuthExchange {
            stream: &mut stream,
            username: "user",
            password: None,
        };

        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AA==".into()),
        };
        let err = exchange
            .execute_command(cmd, &[ReplyCode::AUTH_SUCCESS])
            .await
            .unwrap_err();
        let Error::UnexpectedReply {
            expected,
            code,
            challenge,
            ..
        } = err
        else {
            panic!("expected UnexpectedReply");
        };
        assert_eq!(expected, "235");
        assert_eq!(code, ReplyCode::AUTH_FAILED);
        assert_eq!(challenge.as_deref(), Some(r#"{"status":"401"}"#));
    }

    #[tokio::test]
    async fn test_transaction_with_dot_stuffing() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250 mx.example.com\r\n")
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\n..leading dot\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();

        let client = ready(mock)
            .await
            .mail_from(Address::new("a@example.com").unwrap(), 10)
            .await
            .unwrap()
            .rcpt_to(Address::new("b@example.com").unwrap())
            .await
            .unwrap()
            .data()
            .await
            .unwrap()
            .send_message(b"Subject: hi\n\n.leading dot\n")
            .await
            .unwrap();
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_size_limit_is_enforced_locally() {
        let mock = Builder::new()
            .read(GREETING)
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250 SIZE 10\r\n")
            .build();
        let err = ready(mock)
            .await
            .mail_from(Address::new("a@example.com").unwrap(), 11)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(11)));
    }
}
