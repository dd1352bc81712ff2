//! Message transports and the DSN-driven factories that build them.

mod null;
mod smtp;

pub use null::{NullTransport, NullTransportFactory};
pub use smtp::{SmtpTransport, SmtpTransportFactory};

use async_trait::async_trait;

use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::message::OutgoingMessage;

/// Something that delivers messages.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Delivers one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is invalid or delivery fails.
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;

    /// Human-readable endpoint, e.g. `smtp://smtp.office365.com:587`.
    fn name(&self) -> String;

    /// The SMTP transport behind this one, if it accepts pluggable
    /// authenticators.
    fn as_smtp_mut(&mut self) -> Option<&mut SmtpTransport> {
        None
    }
}

/// Builds transports for the DSN schemes it supports.
pub trait TransportFactory: Send + Sync {
    /// Returns true if this factory handles the DSN's scheme.
    fn supports(&self, dsn: &Dsn) -> bool;

    /// Builds a transport for `dsn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] for a foreign scheme, or
    /// [`Error::InvalidDsn`] for unusable options.
    fn create(&self, dsn: &Dsn) -> Result<Box<dyn Transport>>;
}

/// Ordered set of factories; the first one supporting a DSN wins.
pub struct Transports {
    factories: Vec<Box<dyn TransportFactory>>,
}

impl Transports {
    /// Creates a resolver over `factories`.
    #[must_use]
    pub fn new(factories: Vec<Box<dyn TransportFactory>>) -> Self {
        Self { factories }
    }

    /// Builds a transport from a parsed DSN.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] if no factory supports it.
    pub fn from_dsn(&self, dsn: &Dsn) -> Result<Box<dyn Transport>> {
        let factory = self
            .factories
            .iter()
            .find(|factory| factory.supports(dsn))
            .ok_or_else(|| Error::UnsupportedScheme(dsn.scheme().to_string()))?;
        let transport = factory.create(dsn)?;
        tracing::debug!(transport = %transport.name(), "Transport created");
        Ok(transport)
    }

    /// Parses `dsn` and builds its transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDsn`] or [`Error::UnsupportedScheme`].
    pub fn from_dsn_str(&self, dsn: &str) -> Result<Box<dyn Transport>> {
        self.from_dsn(&dsn.parse()?)
    }
}

impl Default for Transports {
    /// `smtp`, `smtps` and `null`.
    fn default() -> Self {
        Self::new(vec![
            Box::new(SmtpTransportFactory),
            Box::new(NullTransportFactory),
        ])
    }
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transports")
            .field("factories", &self.factories.len())
            .finish()
    }
}
