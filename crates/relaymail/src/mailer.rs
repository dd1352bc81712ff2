//! Mailer facade.

use relaymail_smtp::{Dsn, OutgoingMessage, Transport, TransportFactory, Transports};

use crate::error::{Error, Result};
use crate::factory::OAuthTransportFactory;

/// Message raised when [`MailerService::get_mailer`] has nothing to build.
pub const NO_DSN_MESSAGE: &str = "No DSN configured for relaymail";

/// Sends messages through one transport.
#[derive(Debug)]
pub struct Mailer {
    transport: Box<dyn Transport>,
}

impl Mailer {
    /// Wraps a transport.
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Transport in use.
    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Delivers `message`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error; token failures during authentication
    /// are reachable through [`Error::token_error`].
    pub async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Builds mailers from the configured DSN.
///
/// `oauth://` DSNs go to the [`OAuthTransportFactory`], everything else to
/// the generic [`Transports`] resolver.
#[derive(Debug)]
pub struct MailerService {
    dsn: Option<String>,
    oauth: OAuthTransportFactory,
    transports: Transports,
}

impl MailerService {
    /// Creates a service over the default `smtp`/`smtps`/`null` resolver.
    #[must_use]
    pub fn new(dsn: Option<String>, oauth: OAuthTransportFactory) -> Self {
        Self::with_transports(dsn, oauth, Transports::default())
    }

    /// Creates a service with a custom fallback resolver.
    #[must_use]
    pub const fn with_transports(
        dsn: Option<String>,
        oauth: OAuthTransportFactory,
        transports: Transports,
    ) -> Self {
        Self {
            dsn,
            oauth,
            transports,
        }
    }

    /// Configured DSN, if any.
    #[must_use]
    pub fn dsn(&self) -> Option<&str> {
        self.dsn.as_deref()
    }

    /// Returns a mailer over `transport`, or over the transport the
    /// configured DSN describes when none is given.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no transport is given and no DSN is configured
    /// - [`Error::Smtp`] if the DSN is malformed or its scheme unsupported
    pub fn get_mailer(&self, transport: Option<Box<dyn Transport>>) -> Result<Mailer> {
        if let Some(transport) = transport {
            return Ok(Mailer::new(transport));
        }

        let raw = self
            .dsn
            .as_deref()
            .ok_or_else(|| Error::Config(NO_DSN_MESSAGE.to_string()))?;
        let dsn: Dsn = raw.parse()?;

        let transport = if self.oauth.supports(&dsn) {
            self.oauth.create(&dsn)?
        } else {
            self.transports.from_dsn(&dsn)?
        };
        tracing::debug!(transport = %transport.name(), "Mailer ready");

        Ok(Mailer::new(transport))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authenticator::XOAuth2Authenticator;
    use relaymail_oauth::{Credentials, TokenProvider};
    use relaymail_smtp::{Mailbox, NullTransport, Security};

    fn service(dsn: Option<&str>) -> MailerService {
        let provider = TokenProvider::builder(Credentials::new("t", "c", "s"))
            .build()
            .unwrap();
        let authenticator = Arc::new(XOAuth2Authenticator::new(Arc::new(provider)));
        MailerService::new(
            dsn.map(ToString::to_string),
            OAuthTransportFactory::with_smtp(authenticator),
        )
    }

    #[test]
    fn test_explicit_transport_wins() {
        let mailer = service(None)
            .get_mailer(Some(Box::new(NullTransport)))
            .unwrap();
        assert_eq!(mailer.transport().name(), "null://");
    }

    #[test]
    fn test_missing_dsn() {
        let err = service(None).get_mailer(None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), NO_DSN_MESSAGE);
    }

    #[test]
    fn test_oauth_dsn_routes_to_oauth_factory() {
        let mut mailer = service(Some("oauth://user@example.com@office365"))
            .get_mailer(None)
            .unwrap();
        let smtp = mailer.transport.as_smtp_mut().unwrap();
        assert_eq!(smtp.host(), "smtp.office365.com");
        assert_eq!(smtp.security(), Security::StartTls);
        assert_eq!(smtp.username(), Some("user@example.com"));
    }

    #[test]
    fn test_uppercase_oauth_scheme_is_not_routed_to_xoauth2() {
        let err = service(Some("OAUTH://user@office365"))
            .get_mailer(None)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Smtp(relaymail_smtp::Error::UnsupportedScheme(ref scheme)) if scheme == "OAUTH"
        ));
    }

    #[test]
    fn test_other_dsns_use_generic_resolver() {
        let mailer = service(Some("smtps://mail.contoso.com")).get_mailer(None).unwrap();
        assert_eq!(mailer.transport().name(), "smtps://mail.contoso.com:465");

        let err = service(Some("sendmail://default")).get_mailer(None).unwrap_err();
        assert!(matches!(
            err,
            Error::Smtp(relaymail_smtp::Error::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_send_delegates_to_transport() {
        let mailer = service(Some("null://null")).get_mailer(None).unwrap();
        let message = OutgoingMessage::new(Mailbox::new("a@example.com").unwrap(), "s", "b")
            .to(Mailbox::new("b@example.com").unwrap());
        mailer.send(&message).await.unwrap();

        let empty = OutgoingMessage::new(Mailbox::new("a@example.com").unwrap(), "s", "b");
        assert!(matches!(
            mailer.send(&empty).await,
            Err(Error::Smtp(relaymail_smtp::Error::InvalidMessage(_)))
        ));
    }
}
