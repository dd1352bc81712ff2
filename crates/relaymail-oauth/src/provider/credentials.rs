//! Client-credentials identity of an application registration.

use crate::error::{Error, Result};

/// Tenant, client id and client secret of an Entra ID app registration.
///
/// The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    tenant: String,
    client_id: String,
    client_secret: String,
}

impl Credentials {
    /// Creates a credential set.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Tenant identifier (directory id or verified domain).
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Application (client) id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Checks that no field is blank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first blank field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tenant", &self.tenant),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
