//! Outgoing plain-text messages.

use std::fmt::Write;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::types::{Address, Mailbox};

/// A plain-text email ready for submission.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Sender.
    pub from: Mailbox,
    /// Primary recipients.
    pub to: Vec<Mailbox>,
    /// Carbon-copy recipients.
    pub cc: Vec<Mailbox>,
    /// Blind carbon-copy recipients (envelope only).
    pub bcc: Vec<Mailbox>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

impl OutgoingMessage {
    /// Creates a message without recipients.
    #[must_use]
    pub fn new(from: Mailbox, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: Mailbox) -> Self {
        self.to.push(recipient);
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, recipient: Mailbox) -> Self {
        self.cc.push(recipient);
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, recipient: Mailbox) -> Self {
        self.bcc.push(recipient);
        self
    }

    /// Envelope recipients (to, cc, bcc) without duplicates.
    #[must_use]
    pub fn recipients(&self) -> Vec<&Address> {
        let mut recipients: Vec<&Address> = Vec::new();
        for mailbox in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !recipients.contains(&&mailbox.address) {
                recipients.push(&mailbox.address);
            }
        }
        recipients
    }

    /// Checks the message can be submitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] when there is no recipient.
    pub fn validate(&self) -> Result<()> {
        if self.recipients().is_empty() {
            return Err(Error::InvalidMessage("no recipients specified".into()));
        }
        Ok(())
    }

    /// Renders the RFC 5322 message. `Bcc` is never written.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let now = chrono::Utc::now();
        let mut message = String::new();

        let _ = write!(message, "Date: {}\r\n", now.to_rfc2822());
        let _ = write!(
            message,
            "Message-ID: <{}.{}@{}>\r\n",
            now.timestamp_nanos_opt().unwrap_or_default(),
            std::process::id(),
            self.from.address.domain()
        );
        let _ = write!(message, "From: {}\r\n", self.from);
        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", join(&self.to));
        }
        if !self.cc.is_empty() {
            let _ = write!(message, "Cc: {}\r\n", join(&self.cc));
        }
        let _ = write!(message, "Subject: {}\r\n", encode_header(&self.subject));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        message.push_str("\r\n");
        message.push_str(&self.body);

        message
    }
}

fn join(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Folds line breaks away and RFC 2047-encodes non-ASCII text.
fn encode_header(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if flat.is_ascii() {
        flat
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(flat.as_bytes()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mailbox(s: &str) -> Mailbox {
        s.parse().unwrap()
    }

    #[test]
    fn test_headers_and_body() {
        let message = OutgoingMessage::new(mailbox("Relay <relay@contoso.com>"), "Report", "Hi.")
            .to(mailbox("ops@contoso.com"))
            .cc(mailbox("audit@contoso.com"))
            .bcc(mailbox("archive@contoso.com"));
        let rendered = message.to_rfc5322();

        assert!(rendered.contains("From: \"Relay\" <relay@contoso.com>\r\n"));
        assert!(rendered.contains("To: ops@contoso.com\r\n"));
        assert!(rendered.contains("Cc: audit@contoso.com\r\n"));
        assert!(rendered.contains("Subject: Report\r\n"));
        assert!(rendered.contains("@contoso.com>\r\n"));
        assert!(!rendered.contains("archive@contoso.com"));
        assert!(rendered.ends_with("\r\n\r\nHi."));
    }

    #[test]
    fn test_recipients_are_deduplicated() {
        let message = OutgoingMessage::new(mailbox("a@x.com"), "", "")
            .to(mailbox("b@x.com"))
            .cc(mailbox("B <b@x.com>"))
            .bcc(mailbox("c@x.com"));
        let recipients: Vec<&str> = message.recipients().iter().map(|a| a.as_str()).collect();
        assert_eq!(recipients, vec!["b@x.com", "c@x.com"]);
    }

    #[test]
    fn test_no_recipients_is_invalid() {
        let message = OutgoingMessage::new(mailbox("a@x.com"), "s", "b");
        assert!(matches!(message.validate(), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_subject_encoding() {
        assert_eq!(encode_header("line\r\nBcc: x"), "line  Bcc: x");
        assert_eq!(encode_header("Café"), "=?UTF-8?B?Q2Fmw6k=?=");
    }
}
