//! # relaymail
//!
//! Sends mail through Microsoft 365 using an application's client
//! credentials instead of a mailbox password.
//!
//! A DSN of the form `oauth://{user}@office365` becomes an SMTP transport to
//! `smtp.office365.com:587` with STARTTLS, authenticating with `XOAUTH2` and
//! an access token from [`relaymail_oauth::TokenProvider`]. Any other DSN
//! (`smtp://`, `smtps://`, `null://`) is built by the generic resolver.
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaymail::Settings;
//! use relaymail_smtp::OutgoingMessage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(&Settings::default_path()).await?;
//!     let mailer = settings.mailer_service()?.get_mailer(None)?;
//!
//!     let message = OutgoingMessage::new("relay@contoso.com".parse()?, "Hello", "Sent with XOAUTH2")
//!         .to("ops@contoso.com".parse()?);
//!     mailer.send(&message).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod authenticator;
pub mod config;
mod error;
pub mod factory;
mod mailer;

pub use authenticator::XOAuth2Authenticator;
pub use config::Settings;
pub use error::{Error, Result};
pub use factory::OAuthTransportFactory;
pub use mailer::{Mailer, MailerService, NO_DSN_MESSAGE};
