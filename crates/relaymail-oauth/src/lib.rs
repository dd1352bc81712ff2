//! # relaymail-oauth
//!
//! `OAuth2` client-credentials tokens for Microsoft 365 SMTP relaying.
//!
//! ## Features
//!
//! - **Token provider**: client-credentials grant against the Microsoft
//!   identity platform, cached until 30 seconds before expiry
//! - **Structured errors**: provider diagnostics (`error`, `error_codes`,
//!   `trace_id`, ...) kept as inspectable fields
//! - **Pluggable collaborators**: HTTP client and token cache are traits, with
//!   `reqwest`, in-memory and JSON-file implementations
//! - **SASL**: XOAUTH2 initial-response encoding
//!
//! ## Quick Start
//!
//! ```ignore
//! use relaymail_oauth::{Credentials, TokenProvider};
//!
//! #[tokio::main]
//! async fn main() -> relaymail_oauth::Result<()> {
//!     let provider = TokenProvider::builder(Credentials::new(
//!         "contoso.onmicrosoft.com",
//!         "00000000-0000-0000-0000-000000000000",
//!         "client-secret",
//!     ))
//!     .build()?;
//!
//!     // First call hits the token endpoint, later calls use the cache.
//!     let token = provider.get_token().await?;
//!     let auth = relaymail_oauth::sasl::xoauth2_response("relay@contoso.com", &token);
//!     // Send: AUTH XOAUTH2 {auth}
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cache;
mod error;
pub mod http;
pub mod provider;
pub mod sasl;
pub mod token;

pub use cache::{FileCache, MemoryCache, TokenCache};
pub use error::{CacheError, Error, Result, TokenRequestError, TokenResponseError};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
pub use provider::{Credentials, TokenProvider, TokenProviderBuilder};
pub use token::FetchedToken;
