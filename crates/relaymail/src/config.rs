//! Settings file and environment overrides.
//!
//! ```json
//! {
//!   "mailer": { "dsn": "oauth://relay@contoso.com@office365" },
//!   "office365": {
//!     "tenant": "contoso.onmicrosoft.com",
//!     "client_id": "00000000-0000-0000-0000-000000000000",
//!     "client_secret": "..."
//!   },
//!   "token_cache": "file"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use relaymail_oauth::cache::TOKEN_CACHE_REGION;
use relaymail_oauth::{Credentials, FileCache, MemoryCache, TokenCache, TokenProvider};
use serde::{Deserialize, Serialize};

use crate::authenticator::XOAuth2Authenticator;
use crate::error::Result;
use crate::factory::OAuthTransportFactory;
use crate::mailer::MailerService;

/// Overrides `mailer.dsn`.
pub const ENV_DSN: &str = "RELAYMAIL_DSN";
/// Overrides `office365.tenant`.
pub const ENV_TENANT: &str = "RELAYMAIL_TENANT";
/// Overrides `office365.client_id`.
pub const ENV_CLIENT_ID: &str = "RELAYMAIL_CLIENT_ID";
/// Overrides `office365.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "RELAYMAIL_CLIENT_SECRET";

/// Mailer section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerSettings {
    /// Transport DSN.
    pub dsn: Option<String>,
}

/// App registration used for the client-credentials grant.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Office365Settings {
    /// Tenant id or verified domain.
    pub tenant: String,
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for Office365Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Office365Settings")
            .field("tenant", &self.tenant)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Where access tokens are kept between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenCacheKind {
    /// Process memory; every run fetches a fresh token.
    #[default]
    Memory,
    /// JSON file in the user cache directory, shared between runs.
    File,
}

/// Everything needed to assemble a mailer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mailer section.
    pub mailer: MailerSettings,
    /// Identity provider section.
    pub office365: Office365Settings,
    /// Token cache backend.
    pub token_cache: TokenCacheKind,
}

impl Settings {
    /// Default settings path: `<config dir>/relaymail/settings.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relaymail")
            .join("settings.json")
    }

    /// Reads `path` (missing file means defaults) and applies environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok()).await
    }

    async fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = if tokio::fs::try_exists(path).await? {
            let contents = tokio::fs::read_to_string(path).await?;
            let settings: Self = serde_json::from_str(&contents)?;
            tracing::debug!(path = %path.display(), "Settings loaded");
            settings
        } else {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            Self::default()
        };
        settings.apply_overrides(lookup);
        Ok(settings)
    }

    /// Applies overrides looked up through `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dsn) = get(ENV_DSN) {
            self.mailer.dsn = Some(dsn);
        }
        if let Some(tenant) = get(ENV_TENANT) {
            self.office365.tenant = tenant;
        }
        if let Some(client_id) = get(ENV_CLIENT_ID) {
            self.office365.client_id = client_id;
        }
        if let Some(client_secret) = get(ENV_CLIENT_SECRET) {
            self.office365.client_secret = client_secret;
        }
    }

    /// Client credentials from the `office365` section.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            &self.office365.tenant,
            &self.office365.client_id,
            &self.office365.client_secret,
        )
    }

    /// Builds the token provider with the configured cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a credential is blank or the cache directory
    /// cannot be determined.
    pub fn token_provider(&self) -> Result<TokenProvider> {
        let cache: Arc<dyn TokenCache> = match self.token_cache {
            TokenCacheKind::Memory => Arc::new(MemoryCache::new(TOKEN_CACHE_REGION)),
            TokenCacheKind::File => Arc::new(
                FileCache::in_user_cache_dir(TOKEN_CACHE_REGION)
                    .map_err(relaymail_oauth::Error::from)?,
            ),
        };
        Ok(TokenProvider::builder(self.credentials())
            .cache(cache)
            .build()?)
    }

    /// Assembles the mailer service: token provider, XOAUTH2 authenticator,
    /// `oauth://` factory and DSN.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Settings::token_provider`].
    pub fn mailer_service(&self) -> Result<MailerService> {
        let tokens = Arc::new(self.token_provider()?);
        let authenticator = Arc::new(XOAuth2Authenticator::new(tokens));
        Ok(MailerService::new(
            self.mailer.dsn.clone(),
            OAuthTransportFactory::with_smtp(authenticator),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_partial_file() {
        let settings: Settings =
            serde_json::from_str(r#"{"mailer":{"dsn":"null://null"},"token_cache":"file"}"#)
                .unwrap();
        assert_eq!(settings.mailer.dsn.as_deref(), Some("null://null"));
        assert_eq!(settings.token_cache, TokenCacheKind::File);
        assert!(settings.office365.tenant.is_empty());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DSN, "oauth://relay@contoso.com@office365"),
            (ENV_TENANT, "contoso.onmicrosoft.com"),
            (ENV_CLIENT_ID, " "),
        ]);
        let mut settings = Settings::default();
        settings.office365.client_id = "from-file".into();

        settings.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(
            settings.mailer.dsn.as_deref(),
            Some("oauth://relay@contoso.com@office365")
        );
        assert_eq!(settings.office365.tenant, "contoso.onmicrosoft.com");
        assert_eq!(settings.office365.client_id, "from-file");
    }

    #[test]
    fn test_blank_credentials_are_rejected() {
        let err = Settings::default().token_provider().unwrap_err();
        assert!(err.to_string().contains("tenant is empty"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut settings = Settings::default();
        settings.office365.client_secret = "hunter2".into();
        assert!(!format!("{settings:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("relaymail-test-missing/settings.json");
        let settings = Settings::load_with(&path, |_| None).await.unwrap();
        assert_eq!(settings, Settings::default());

        let settings = Settings::load_with(&path, |key| {
            (key == ENV_DSN).then(|| "null://null".to_string())
        })
        .await
        .unwrap();
        assert_eq!(settings.mailer.dsn.as_deref(), Some("null://null"));
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = std::env::temp_dir().join(format!("relaymail-settings-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("settings.json");
        tokio::fs::write(
            &path,
            r#"{"office365":{"tenant":"t","client_id":"c","client_secret":"s"}}"#,
        )
        .await
        .unwrap();

        let settings = Settings::load_with(&path, |_| None).await.unwrap();
        assert_eq!(settings.office365.client_id, "c");
        assert!(settings.mailer_service().is_ok());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
