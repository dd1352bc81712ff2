//! Transport that discards every message.

use async_trait::async_trait;

use super::{Transport, TransportFactory};
use crate::dsn::Dsn;
use crate::error::{Error, Result};
use crate::message::OutgoingMessage;

/// Accepts valid messages and drops them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        message.validate()?;
        tracing::debug!(
            recipients = message.recipients().len(),
            "Message discarded by null transport"
        );
        Ok(())
    }

    fn name(&self) -> String {
        "null://".to_string()
    }
}

/// Factory for `null://` DSNs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransportFactory;

impl TransportFactory for NullTransportFactory {
    fn supports(&self, dsn: &Dsn) -> bool {
        dsn.scheme() == "null"
    }

    fn create(&self, dsn: &Dsn) -> Result<Box<dyn Transport>> {
        if !self.supports(dsn) {
            return Err(Error::UnsupportedScheme(dsn.scheme().to_string()));
        }
        Ok(Box::new(NullTransport))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Mailbox;

    #[tokio::test]
    async fn test_discards_valid_messages() {
        let from = Mailbox::new("a@example.com").unwrap();
        let message = OutgoingMessage::new(from.clone(), "s", "b")
            .to(Mailbox::new("b@example.com").unwrap());
        NullTransport.send(&message).await.unwrap();

        let empty = OutgoingMessage::new(from, "s", "b");
        assert!(NullTransport.send(&empty).await.is_err());
    }

    #[test]
    fn test_factory_rejects_other_schemes() {
        let dsn = Dsn::new("smtp", "localhost");
        assert!(!NullTransportFactory.supports(&dsn));
        assert!(matches!(
            NullTransportFactory.create(&dsn),
            Err(Error::UnsupportedScheme(_))
        ));
    }
}
