//! Core SMTP types.

mod address;
mod extension;
mod reply;
mod security;

pub use address::{Address, Mailbox};
pub use extension::{AuthMechanism, Extension};
pub use reply::{Reply, ReplyCode};
pub use security::Security;
