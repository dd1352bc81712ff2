//! SMTP submission transport.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Transport, TransportFactory};
use crate::auth::{Authenticator, LoginAuthenticator, PlainAuthenticator};
use crate::connection::{Client, Connected, SmtpConnection, connect, connect_tls};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::message::OutgoingMessage;
use crate::types::Security;

const DEFAULT_HELLO: &str = "localhost";

/// Delivers each message over a fresh SMTP session.
///
/// The session runs EHLO, STARTTLS when required (or offered, unless
/// `auto_tls` is off), AUTH when a username is set and the server advertises
/// mechanisms, then the mail transaction and QUIT.
#[derive(Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    security: Security,
    auto_tls: bool,
    hello_name: String,
    username: Option<String>,
    password: Option<String>,
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl SmtpTransport {
    /// Creates a transport with the PLAIN and LOGIN authenticators.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, security: Security) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            auto_tls: true,
            hello_name: DEFAULT_HELLO.to_string(),
            username: None,
            password: None,
            authenticators: vec![Arc::new(PlainAuthenticator), Arc::new(LoginAuthenticator)],
        }
    }

    /// Server host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Connection security.
    #[must_use]
    pub const fn security(&self) -> Security {
        self.security
    }

    /// Disables opportunistic STARTTLS for [`Security::None`].
    pub const fn set_auto_tls(&mut self, auto_tls: bool) {
        self.auto_tls = auto_tls;
    }

    /// Name sent with EHLO.
    #[must_use]
    pub fn hello_name(&self) -> &str {
        &self.hello_name
    }

    /// Sets the name sent with EHLO.
    pub fn set_hello_name(&mut self, hello_name: impl Into<String>) {
        self.hello_name = hello_name.into();
    }

    /// Username for AUTH, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Sets the username for AUTH.
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    /// Sets the password for AUTH.
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Authenticators, in preference order.
    #[must_use]
    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.authenticators
    }

    /// Replaces the authenticator list.
    pub fn set_authenticators(&mut self, authenticators: Vec<Arc<dyn Authenticator>>) {
        self.authenticators = authenticators;
    }

    async fn open(&self) -> Result<Client<Connected>> {
        let stream = match self.security {
            Security::Tls => connect_tls(&self.host, self.port).await?,
            Security::StartTls | Security::None => connect(&self.host, self.port).await?,
        };
        let client = Client::from_stream(stream)
            .await?
            .ehlo(&self.hello_name)
            .await?;

        let upgrade = match self.security {
            Security::StartTls => true,
            Security::None => self.auto_tls && client.server_info().supports_starttls(),
            Security::Tls => false,
        };
        if upgrade {
            return client.starttls(&self.host, &self.hello_name).await;
        }
        Ok(client)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        message.validate()?;
        let payload = message.to_rfc5322();
        let from = message.from.address.clone();
        let recipients = message.recipients();

        let client = self.open().await?;

        let username = self.username.as_deref().filter(|name| !name.is_empty());
        let client = match username {
            Some(username) if !client.server_info().auth_mechanisms().is_empty() => {
                client
                    .authenticate(&self.authenticators, username, self.password.as_deref())
                    .await?
                    .mail_from(from, payload.len())
                    .await?
            }
            _ => {
                if username.is_some() {
                    tracing::debug!(server = %self.host, "Server offers no AUTH, sending unauthenticated");
                }
                client.mail_from(from, payload.len()).await?
            }
        };

        let (first, rest) = recipients
            .split_first()
            .ok_or_else(|| Error::InvalidMessage("no recipients specified".into()))?;
        let mut client = client.rcpt_to((*first).clone()).await?;
        for recipient in rest {
            client = client.rcpt_to((*recipient).clone()).await?;
        }

        let client = client.data().await?.send_message(payload.as_bytes()).await?;
        tracing::info!(
            transport = %self.name(),
            recipients = recipients.len(),
            "Message accepted"
        );

        // The message is already queued; a failed QUIT changes nothing.
        if let Err(e) = client.quit().await {
            tracing::debug!(error = %e, "QUIT failed");
        }
        Ok(())
    }

    fn name(&self) -> String {
        let scheme = if self.security == Security::Tls {
            "smtps"
        } else {
            "smtp"
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    fn as_smtp_mut(&mut self) -> Option<&mut SmtpTransport> {
        Some(self)
    }
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mechanisms: Vec<&str> = self
            .authenticators
            .iter()
            .map(|auth| auth.mechanism().as_str())
            .collect();
        f.debug_struct("SmtpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("hello_name", &self.hello_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("authenticators", &mechanisms)
            .finish_non_exhaustive()
    }
}

/// Factory for `smtp://` and `smtps://` DSNs.
///
/// Options: `tls` or `require_tls=true` require STARTTLS, `auto_tls=false`
/// disables opportunistic STARTTLS, `local_domain` sets the EHLO name.
/// `smtps`, or `smtp` on port 465, uses implicit TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpTransportFactory;

impl TransportFactory for SmtpTransportFactory {
    fn supports(&self, dsn: &Dsn) -> bool {
        matches!(dsn.scheme(), "smtp" | "smtps")
    }

    fn create(&self, dsn: &Dsn) -> Result<Box<dyn Transport>> {
        if !self.supports(dsn) {
            return Err(Error::UnsupportedScheme(dsn.scheme().to_string()));
        }
        if dsn.option("verify_peer").is_some() {
            return Err(Error::InvalidDsn(
                "the verify_peer option is not supported".into(),
            ));
        }

        let implicit_tls = dsn.scheme() == "smtps" || dsn.port() == Some(Security::Tls.default_port());
        let require_tls = dsn.option("tls").is_some() || dsn.option("require_tls") == Some("true");
        let security = if implicit_tls {
            Security::Tls
        } else if require_tls {
            Security::StartTls
        } else {
            Security::None
        };

        let mut transport =
            SmtpTransport::new(dsn.host(), dsn.port_or(security.default_port()), security);
        if dsn.option("auto_tls") == Some("false") {
            transport.set_auto_tls(false);
        }
        if let Some(local_domain) = dsn.option("local_domain") {
            transport.set_hello_name(local_domain);
        }
        if let Some(user) = dsn.user() {
            transport.set_username(user);
        }
        if let Some(password) = dsn.password() {
            transport.set_password(password);
        }
        Ok(Box::new(transport))
    }
}
