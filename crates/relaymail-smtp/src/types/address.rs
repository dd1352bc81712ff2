//! Envelope addresses and header mailboxes.

use std::str::FromStr;

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
///
/// Only shape is checked: a non-empty local part and domain around the last
/// `@`, and nothing that could break out of `<...>` or a header line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is malformed.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let trimmed = addr.trim();

        let Some((local, domain)) = trimmed.rsplit_once('@') else {
            return Err(Error::InvalidAddress(format!("\"{addr}\" must contain @")));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "\"{addr}\" needs both a local part and a domain"
            )));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>' | ','))
        {
            return Err(Error::InvalidAddress(format!(
                "\"{addr}\" contains forbidden characters"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Domain part (after the last `@`).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Mailbox (optional display name + address) as written in headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a new mailbox with just an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: None,
            address: Address::new(address)?,
        })
    }

    /// Creates a new mailbox with a display name and address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: Some(name.into()),
            address: Address::new(address)?,
        })
    }
}

/// Accepts `addr@example.com` and `Display Name <addr@example.com>`.
impl FromStr for Mailbox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match (s.rfind('<'), s.ends_with('>')) {
            (Some(open), true) => {
                let address = &s[open + 1..s.len() - 1];
                let name = s[..open].trim().trim_matches('"').trim();
                if name.is_empty() {
                    Self::new(address)
                } else {
                    Self::with_name(name, address)
                }
            }
            _ => Self::new(s),
        }
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_address_splits_on_last_at() {
        let addr = Address::new(" relay@contoso.com ").unwrap();
        assert_eq!(addr.as_str(), "relay@contoso.com");
        assert_eq!(addr.domain(), "contoso.com");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["", "relay", "@contoso.com", "relay@", "a b@c.d", "a@b>\r\nRCPT"] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_parse_mailbox_with_name() {
        let mailbox: Mailbox = "\"Relay Bot\" <relay@contoso.com>".parse().unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Relay Bot"));
        assert_eq!(mailbox.address.as_str(), "relay@contoso.com");
        assert_eq!(mailbox.to_string(), "\"Relay Bot\" <relay@contoso.com>");
    }

    #[test]
    fn test_parse_bare_mailbox() {
        let mailbox: Mailbox = "<ops@contoso.com>".parse().unwrap();
        assert!(mailbox.name.is_none());
        assert_eq!(mailbox.to_string(), "ops@contoso.com");
    }

    #[test]
    fn test_display_escapes_quotes() {
        let mailbox = Mailbox::with_name("The \"Bot\"", "bot@contoso.com").unwrap();
        assert_eq!(mailbox.to_string(), "\"The \\\"Bot\\\"\" <bot@contoso.com>");
    }
}
