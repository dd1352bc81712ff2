//! Client-credentials token provider for Microsoft 365.

mod credentials;

pub use credentials::Credentials;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;
use url::form_urlencoded;

use crate::cache::{MemoryCache, TokenCache};
use crate::error::{Result, TokenRequestError};
use crate::http::{HttpClient, HttpRequest, ReqwestClient};
use crate::token::FetchedToken;

/// Token endpoint template; `{tenant}` is replaced with the tenant identifier.
pub const OAUTH_URL: &str = "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token";

/// Scope requested for SMTP relay access.
pub const SCOPE: &str = "https://outlook.office365.com/.default";

/// `OAuth2` grant type.
pub const GRANT_TYPE: &str = "client_credentials";

/// Key of the token entry inside the cache region.
pub const CACHE_KEY: &str = "access_token";

/// Seconds subtracted from the reported lifetime before caching.
pub const SAFETY_MARGIN_SECS: u64 = 30;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Issues access tokens with the `OAuth2` client-credentials grant and caches
/// them until shortly before they expire.
pub struct TokenProvider {
    credentials: Credentials,
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn TokenCache>,
    refresh: Mutex<()>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Creates a provider from fully formed collaborators.
    #[must_use]
    pub fn new(
        credentials: Credentials,
        http: Arc<dyn HttpClient>,
        cache: Arc<dyn TokenCache>,
    ) -> Self {
        Self {
            credentials,
            http,
            cache,
            refresh: Mutex::new(()),
        }
    }

    /// Starts a builder with default collaborators.
    #[must_use]
    pub fn builder(credentials: Credentials) -> TokenProviderBuilder {
        TokenProviderBuilder::new(credentials)
    }

    /// Returns the credential set.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Returns an access token, from cache when possible.
    ///
    /// On a cache miss a new token is fetched and cached for its reported
    /// lifetime minus [`SAFETY_MARGIN_SECS`] (at least one second). A failing
    /// cache never prevents a token from being returned.
    ///
    /// # Errors
    ///
    /// Returns the error of [`TokenProvider::fetch_token`] on a cache miss.
    pub async fn get_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            debug!("Using cached access token");
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached_token().await {
            debug!("Using access token refreshed by a concurrent caller");
            return Ok(token);
        }

        let fetched = self.fetch_token().await?;
        let ttl = cache_ttl(fetched.expires_in);

        if let Err(e) = self.cache.set(CACHE_KEY, &fetched.access_token, ttl).await {
            warn!("Failed to cache access token: {e}");
        }

        Ok(fetched.access_token)
    }

    /// Fetches a new token from the token endpoint, bypassing the cache.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Request`] if the endpoint answers with a non-2xx status
    /// - [`crate::Error::Response`] if a 2xx body has no `access_token`
    /// - the HTTP client's error if the request cannot be sent
    pub async fn fetch_token(&self) -> Result<FetchedToken> {
        let request = self.token_request()?;
        let response = self.http.send(request).await?;

        if !response.is_success() {
            let err = TokenRequestError::from_http(response.status, &response.body);
            warn!(
                status = err.status(),
                error = err.error().unwrap_or_default(),
                trace_id = err.trace_id().unwrap_or_default(),
                correlation_id = err.correlation_id().unwrap_or_default(),
                "Token request rejected"
            );
            return Err(err.into());
        }

        let token = FetchedToken::from_response_body(&response.body)?;
        info!(expires_in = token.expires_in, "Fetched new access token");
        Ok(token)
    }

    /// Drops the cached token so the next [`TokenProvider::get_token`] fetches.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be written.
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.remove(CACHE_KEY).await?;
        Ok(())
    }

    /// Builds the token endpoint request.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant does not form a valid URL.
    pub fn token_request(&self) -> Result<HttpRequest> {
        let url = Url::parse(&OAUTH_URL.replace("{tenant}", self.credentials.tenant()))?;

        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", self.credentials.client_id())
            .append_pair("scope", SCOPE)
            .append_pair("client_secret", self.credentials.client_secret())
            .append_pair("grant_type", GRANT_TYPE)
            .finish();

        Ok(HttpRequest::post(url)
            .with_header("Content-Type", FORM_CONTENT_TYPE)
            .with_body(body))
    }

    async fn cached_token(&self) -> Option<String> {
        match self.cache.get(CACHE_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Failed to read token cache: {e}");
                None
            }
        }
    }
}

/// Cache lifetime for a token reported to live `expires_in` seconds.
#[must_use]
pub fn cache_ttl(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_sub(SAFETY_MARGIN_SECS).max(1))
}

/// Builder for [`TokenProvider`].
///
/// | option | default |
/// |---|---|
/// | [`http_client`](Self::http_client) | [`ReqwestClient`] without a request timeout |
/// | [`cache`](Self::cache) | [`MemoryCache`] in region [`crate::cache::TOKEN_CACHE_REGION`] |
pub struct TokenProviderBuilder {
    credentials: Credentials,
    http: Option<Arc<dyn HttpClient>>,
    cache: Option<Arc<dyn TokenCache>>,
}

impl TokenProviderBuilder {
    /// Creates a builder for the given credentials.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            http: None,
            cache: None,
        }
    }

    /// Sets the HTTP client.
    #[must_use]
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Sets the token cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates the credentials and builds the provider.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if a credential is empty, or an
    /// error if the default HTTP client cannot be created.
    pub fn build(self) -> Result<TokenProvider> {
        self.credentials.validate()?;

        let http = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::new()?),
        };
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::default()));

        Ok(TokenProvider::new(self.credentials, http, cache))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::cache::CacheResult;
    use crate::error::{CacheError, Error, TokenResponseError};
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// HTTP client returning a canned response and recording requests.
    struct MockHttp {
        response: HttpResponse,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl MockHttp {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: HttpResponse::new(status, body),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    /// HTTP client that always fails at the transport level.
    struct UnreachableHttp;

    #[async_trait]
    impl HttpClient for UnreachableHttp {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into())
        }
    }

    /// Cache that records every `set` call.
    #[derive(Default)]
    struct RecordingCache {
        value: StdMutex<Option<String>>,
        sets: StdMutex<Vec<(String, String, Duration)>>,
        gets: AtomicUsize,
        fail_writes: bool,
        fail_reads: bool,
    }

    impl RecordingCache {
        fn holding(token: &str) -> Arc<Self> {
            Arc::new(Self {
                value: StdMutex::new(Some(token.to_string())),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl TokenCache for RecordingCache {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            assert_eq!(key, CACHE_KEY);
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(CacheError::Backend("read failed".into()));
            }
            Ok(self.value.lock().unwrap().clone())
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
            self.sets
                .lock()
                .unwrap()
                .push((key.to_string(), value.to_string(), ttl));
            if self.fail_writes {
                return Err(CacheError::Backend("write failed".into()));
            }
            *self.value.lock().unwrap() = Some(value.to_string());
            Ok(())
        }

        async fn remove(&self, _key: &str) -> CacheResult<()> {
            *self.value.lock().unwrap() = None;
            Ok(())
        }
    }

    fn credentials() -> Credentials {
        Credentials::new("my-tenant", "my-client-id", "my-client-secret")
    }

    fn provider(http: Arc<dyn HttpClient>, cache: Arc<dyn TokenCache>) -> TokenProvider {
        TokenProvider::new(credentials(), http, cache)
    }

    #[tokio::test]
    async fn test_get_token_returns_cached_token() {
        let http = MockHttp::new(200, r#"{"access_token":"unused"}"#);
        let cache = RecordingCache::holding("cached_token");
        let provider = provider(http.clone(), cache.clone());

        assert_eq!(provider.get_token().await.unwrap(), "cached_token");
        assert_eq!(http.calls(), 0);
        assert!(cache.sets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_token_caches_new_token_with_safety_margin() {
        let http = MockHttp::new(200, r#"{"access_token":"new_token","expires_in":120}"#);
        let cache = Arc::new(RecordingCache::default());
        let provider = provider(http.clone(), cache.clone());

        assert_eq!(provider.get_token().await.unwrap(), "new_token");
        assert_eq!(http.calls(), 1);

        let sets = cache.sets.lock().unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(
            sets[0],
            (
                "access_token".to_string(),
                "new_token".to_string(),
                Duration::from_secs(90)
            )
        );

        let request = &http.requests.lock().unwrap()[0];
        assert_eq!(request.method.as_str(), "POST");
        assert_eq!(
            request.url.as_str(),
            "https://login.microsoftonline.com/my-tenant/oauth2/v2.0/token"
        );
        assert!(request.header("Content-Type").is_some());
    }

    #[tokio::test]
    async fn test_short_lived_token_ttl_is_floored() {
        let http = MockHttp::new(200, r#"{"access_token":"t","expires_in":10}"#);
        let cache = Arc::new(RecordingCache::default());
        let provider = provider(http, cache.clone());

        provider.get_token().await.unwrap();
        assert_eq!(cache.sets.lock().unwrap()[0].2, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_empty_cached_value_is_a_miss() {
        let http = MockHttp::new(200, r#"{"access_token":"fresh"}"#);
        let cache = RecordingCache::holding("");
        let provider = provider(http.clone(), cache.clone());

        assert_eq!(provider.get_token().await.unwrap(), "fresh");
        assert_eq!(http.calls(), 1);
        assert_eq!(
            cache.sets.lock().unwrap()[0].2,
            Duration::from_secs(3600 - 30)
        );
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_swallowed() {
        let http = MockHttp::new(200, r#"{"access_token":"new_token","expires_in":120}"#);
        let cache = Arc::new(RecordingCache {
            fail_writes: true,
            ..RecordingCache::default()
        });
        let provider = provider(http, cache.clone());

        assert_eq!(provider.get_token().await.unwrap(), "new_token");
        assert_eq!(cache.sets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_read_failure_falls_back_to_fetch() {
        let http = MockHttp::new(200, r#"{"access_token":"new_token"}"#);
        let cache = Arc::new(RecordingCache {
            fail_reads: true,
            ..RecordingCache::default()
        });
        let provider = provider(http.clone(), cache);

        assert_eq!(provider.get_token().await.unwrap(), "new_token");
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_warm_cache_is_idempotent() {
        let http = MockHttp::new(200, r#"{"access_token":"abc","expires_in":3600}"#);
        let provider = provider(http.clone(), Arc::new(MemoryCache::new("test")));

        let first = provider.get_token().await.unwrap();
        let second = provider.get_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_lifetime_still_issues_token() {
        let http = MockHttp::new(
            200,
            r#"{"access_token":"abc","expires_in":18446744073709551615}"#,
        );
        let cache = Arc::new(MemoryCache::new("test"));
        let provider = provider(http.clone(), cache.clone());

        assert_eq!(provider.get_token().await.unwrap(), "abc");
        assert_eq!(provider.get_token().await.unwrap(), "abc");
        assert_eq!(http.calls(), 2);
        assert!(cache.get(CACHE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_cold_callers_share_one_fetch() {
        let http = MockHttp::new(200, r#"{"access_token":"abc","expires_in":3600}"#);
        let provider = provider(http.clone(), Arc::new(MemoryCache::new("test")));

        let (a, b, c) = tokio::join!(
            provider.get_token(),
            provider.get_token(),
            provider.get_token()
        );

        assert_eq!(a.unwrap(), "abc");
        assert_eq!(b.unwrap(), "abc");
        assert_eq!(c.unwrap(), "abc");
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_refetch() {
        let http = MockHttp::new(200, r#"{"access_token":"abc","expires_in":120}"#);
        let provider = provider(http.clone(), Arc::new(MemoryCache::new("test")));

        provider.get_token().await.unwrap();
        tokio::time::advance(Duration::from_secs(91)).await;
        provider.get_token().await.unwrap();

        assert_eq!(http.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_token_makes_request_and_parses_response() {
        let http = MockHttp::new(200, r#"{"access_token":"abc123","expires_in":3600}"#);
        let provider = provider(http.clone(), Arc::new(RecordingCache::default()));

        let token = provider.fetch_token().await.unwrap();
        assert_eq!(token, FetchedToken::new("abc123", 3600));

        let request = &http.requests.lock().unwrap()[0];
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            String::from_utf8(request.body.clone()).unwrap(),
            "client_id=my-client-id\
             &scope=https%3A%2F%2Foutlook.office365.com%2F.default\
             &client_secret=my-client-secret\
             &grant_type=client_credentials"
        );
    }

    #[tokio::test]
    async fn test_fetch_token_fails_on_error_response() {
        let http = MockHttp::new(400, "bad request");
        let provider = provider(http.clone(), Arc::new(RecordingCache::default()));

        let err = provider.fetch_token().await.unwrap_err();
        assert!(
            err.to_string()
                .starts_with("OAuth token request failed (HTTP 400).")
        );
        match err {
            Error::Request(req) => {
                assert_eq!(req.status(), 400);
                assert!(req.error().is_none());
                assert!(req.error_description().is_none());
                assert!(req.error_codes().is_none());
                assert!(req.trace_id().is_none());
            }
            other => panic!("expected request error, got {other:?}"),
        }
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_token_fails_when_access_token_missing() {
        let http = MockHttp::new(200, r#"{"foo":"bar"}"#);
        let provider = provider(http, Arc::new(RecordingCache::default()));

        let err = provider.fetch_token().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "OAuth token response is invalid: missing access_token."
        );
        assert!(matches!(
            err,
            Error::Response(TokenResponseError::MissingAccessToken)
        ));
    }

    #[tokio::test]
    async fn test_get_token_propagates_fetch_error_without_caching() {
        let http = MockHttp::new(401, r#"{"error":"invalid_client"}"#);
        let cache = Arc::new(RecordingCache::default());
        let provider = provider(http, cache.clone());

        let err = provider.get_token().await.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(cache.sets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let provider = provider(Arc::new(UnreachableHttp), Arc::new(MemoryCache::new("t")));
        assert!(matches!(provider.get_token().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let http = MockHttp::new(200, r#"{"access_token":"abc"}"#);
        let provider = provider(http.clone(), Arc::new(MemoryCache::new("test")));

        provider.get_token().await.unwrap();
        provider.invalidate().await.unwrap();
        provider.get_token().await.unwrap();

        assert_eq!(http.calls(), 2);
    }

    #[test]
    fn test_cache_ttl() {
        assert_eq!(cache_ttl(3600), Duration::from_secs(3570));
        assert_eq!(cache_ttl(120), Duration::from_secs(90));
        assert_eq!(cache_ttl(31), Duration::from_secs(1));
        assert_eq!(cache_ttl(10), Duration::from_secs(1));
        assert_eq!(cache_ttl(0), Duration::from_secs(1));
    }

    #[test]
    fn test_builder_rejects_empty_credentials() {
        let result = TokenProvider::builder(Credentials::new("", "id", "secret"))
            .http_client(MockHttp::new(200, "{}"))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_with_collaborators() {
        let provider = TokenProvider::builder(credentials())
            .http_client(MockHttp::new(200, "{}"))
            .cache(Arc::new(MemoryCache::new("test")))
            .build()
            .unwrap();
        assert_eq!(provider.credentials().tenant(), "my-tenant");
    }
}
