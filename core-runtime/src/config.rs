//! # Core Configuration Module
//!
//! Provides configuration management for the credential core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the host bridges and the timing knobs of the
//! credential lifecycle. It enforces fail-fast validation so that a missing
//! bridge or a nonsensical duration is reported at startup instead of on the
//! first token refresh.
//!
//! ## Required Dependencies
//!
//! - `SettingsStore` - Persistence of the plugin settings document
//! - `HttpClient` - Token endpoint and licensing requests
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Presenter` - Where authorization URLs go (default: `NoopPresenter`)
//! - `Clock` - Time source (default: `SystemClock`)
//!
//! When the `desktop-shims` feature is enabled, a `ReqwestHttpClient`, a
//! `TracingPresenter` and (given [`CoreConfigBuilder::settings_db_path`]) a
//! `SqliteSettingsStore` are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .settings_store(Arc::new(MySettingsStore))
//!     .http_client(Arc::new(MyHttpClient))
//!     .token_refresh_margin(Duration::from_secs(120))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! // A zero auth timeout is rejected before any bridge is touched
//! let config = CoreConfig::builder()
//!     .auth_timeout(Duration::ZERO)
//!     .build()
//!     .expect("Should fail - zero timeout");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, Presenter, RetryPolicy, SettingsStore, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default clock-skew buffer subtracted from token expiry.
pub const DEFAULT_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
/// Default upper bound for one token endpoint round trip, retries included.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Default delay between an entitlement lapsing and its credentials being wiped.
pub const DEFAULT_CREDENTIAL_GRACE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default period of the proactive refresh scheduler.
pub const DEFAULT_REFRESH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Core configuration for the credential core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub settings_store: Arc<dyn SettingsStore>,
    pub http_client: Arc<dyn HttpClient>,
    pub presenter: Arc<dyn Presenter>,
    pub clock: Arc<dyn Clock>,

    /// Tokens are refreshed once `now >= expires_at - token_refresh_margin`
    pub token_refresh_margin: Duration,

    /// Timeout applied around each token endpoint operation
    pub auth_timeout: Duration,

    /// Grace period before credentials of a lapsed backend are wiped
    pub credential_grace_period: Duration,

    /// How often the background scheduler looks for tokens nearing expiry
    pub refresh_check_interval: Duration,

    /// Backoff used for token refresh and entitlement sync
    pub retry_policy: RetryPolicy,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("settings_store", &"SettingsStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("presenter", &"Presenter { ... }")
            .field("clock", &"Clock { ... }")
            .field("token_refresh_margin", &self.token_refresh_margin)
            .field("auth_timeout", &self.auth_timeout)
            .field("credential_grace_period", &self.credential_grace_period)
            .field("refresh_check_interval", &self.refresh_check_interval)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Auth timeout is non-zero and at most 10 minutes
    /// - Refresh margin is below 1 hour (larger values refresh on every call)
    /// - Refresh check interval is non-zero
    /// - Retry policy makes at least one and at most 10 attempts
    pub fn validate(&self) -> Result<()> {
        validate_timing(
            self.auth_timeout,
            self.token_refresh_margin,
            self.refresh_check_interval,
            &self.retry_policy,
        )
    }
}

fn validate_timing(
    auth_timeout: Duration,
    margin: Duration,
    check_interval: Duration,
    retry_policy: &RetryPolicy,
) -> Result<()> {
    if auth_timeout.is_zero() {
        return Err(Error::Config(
            "Auth timeout must be greater than zero".to_string(),
        ));
    }

    if auth_timeout > Duration::from_secs(10 * 60) {
        return Err(Error::Config(
            "Auth timeout exceeds maximum of 10 minutes".to_string(),
        ));
    }

    if margin >= Duration::from_secs(60 * 60) {
        return Err(Error::Config(
            "Token refresh margin must be below 1 hour".to_string(),
        ));
    }

    if check_interval.is_zero() {
        return Err(Error::Config(
            "Refresh check interval must be greater than zero".to_string(),
        ));
    }

    if retry_policy.max_attempts == 0 || retry_policy.max_attempts > 10 {
        return Err(Error::Config(
            "Retry policy must allow between 1 and 10 attempts".to_string(),
        ));
    }

    Ok(())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for token exchange and refresh. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Plugin hosts: inject a client backed by the host's request API."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_presenter() -> Arc<dyn Presenter> {
    Arc::new(bridge_traits::NoopPresenter)
}

#[cfg(feature = "desktop-shims")]
fn provide_default_presenter() -> Arc<dyn Presenter> {
    Arc::new(bridge_desktop::TracingPresenter::new())
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to persist credentials. \
                 Desktop: enable the 'desktop-shims' feature and set settings_db_path(). \
                 Plugin hosts: inject a store backed by the host's data slot."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(db_path: Option<PathBuf>) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let path = db_path.ok_or_else(settings_store_missing_error)?;

    let init_store = |path: PathBuf| -> Result<SqliteSettingsStore> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on panics inside a runtime, so build on a helper thread there
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_db_path: Option<PathBuf>) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    settings_store: Option<Arc<dyn SettingsStore>>,
    settings_db_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    presenter: Option<Arc<dyn Presenter>>,
    clock: Option<Arc<dyn Clock>>,
    token_refresh_margin: Option<Duration>,
    auth_timeout: Option<Duration>,
    credential_grace_period: Option<Duration>,
    refresh_check_interval: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl CoreConfigBuilder {
    /// Sets the settings store implementation (required unless the desktop
    /// default can be created from [`settings_db_path`](Self::settings_db_path)).
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Path of the SQLite file used by the desktop default settings store.
    ///
    /// Ignored when a settings store is injected explicitly.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .settings_db_path("/path/to/settings.db");
    /// ```
    pub fn settings_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings_db_path = Some(path.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, `ReqwestHttpClient` is used when the `desktop-shims`
    /// feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Injects the time source. Tests use `ManualClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Clock-skew buffer before expiry at which a token counts as stale.
    ///
    /// Default: 5 minutes
    pub fn token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = Some(margin);
        self
    }

    /// Default: 2 minutes
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = Some(timeout);
        self
    }

    /// Delay between an entitlement lapsing and the wipe of the gated
    /// backend's credentials.
    ///
    /// Default: 7 days
    pub fn credential_grace_period(mut self, grace: Duration) -> Self {
        self.credential_grace_period = Some(grace);
        self
    }

    /// Default: 60 seconds
    pub fn refresh_check_interval(mut self, interval: Duration) -> Self {
        self.refresh_check_interval = Some(interval);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Timing knobs are validated first so that a bad duration never causes a
    /// default bridge (and its SQLite file) to be created.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a duration or the retry policy is invalid
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no
    ///   default can be provided
    pub fn build(self) -> Result<CoreConfig> {
        let token_refresh_margin = self
            .token_refresh_margin
            .unwrap_or(DEFAULT_TOKEN_REFRESH_MARGIN);
        let auth_timeout = self.auth_timeout.unwrap_or(DEFAULT_AUTH_TIMEOUT);
        let credential_grace_period = self
            .credential_grace_period
            .unwrap_or(DEFAULT_CREDENTIAL_GRACE_PERIOD);
        let refresh_check_interval = self
            .refresh_check_interval
            .unwrap_or(DEFAULT_REFRESH_CHECK_INTERVAL);
        let retry_policy = self.retry_policy.unwrap_or_default();

        validate_timing(
            auth_timeout,
            token_refresh_margin,
            refresh_check_interval,
            &retry_policy,
        )?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.settings_db_path)?,
        };

        let config = CoreConfig {
            settings_store,
            http_client,
            presenter: self.presenter.unwrap_or_else(provide_default_presenter),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            token_refresh_margin,
            auth_timeout,
            credential_grace_period,
            refresh_check_interval,
            retry_policy,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse, ManualClock, MemorySettingsStore};

    struct StubHttpClient;

    #[async_trait]
    impl HttpClient for StubHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .settings_store(Arc::new(MemorySettingsStore::new()))
            .http_client(Arc::new(StubHttpClient))
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.token_refresh_margin, DEFAULT_TOKEN_REFRESH_MARGIN);
        assert_eq!(config.auth_timeout, DEFAULT_AUTH_TIMEOUT);
        assert_eq!(config.credential_grace_period, DEFAULT_CREDENTIAL_GRACE_PERIOD);
        assert_eq!(config.refresh_check_interval, DEFAULT_REFRESH_CHECK_INTERVAL);
        assert_eq!(config.retry_policy.max_attempts, 3);
    }

    #[test]
    fn test_builder_overrides_timing() {
        let config = base_builder()
            .token_refresh_margin(Duration::from_secs(30))
            .auth_timeout(Duration::from_secs(5))
            .credential_grace_period(Duration::from_secs(60))
            .refresh_check_interval(Duration::from_secs(1))
            .build()
            .unwrap();

        assert_eq!(config.token_refresh_margin, Duration::from_secs(30));
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert_eq!(config.credential_grace_period, Duration::from_secs(60));
        assert_eq!(config.refresh_check_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_uses_injected_clock() {
        let config = base_builder()
            .clock(Arc::new(ManualClock::new(1_234)))
            .build()
            .unwrap();

        assert_eq!(config.clock.unix_timestamp_millis(), 1_234);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let result = base_builder().auth_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("Auth timeout")));
    }

    #[test]
    fn test_validate_rejects_excessive_timeout() {
        let result = base_builder()
            .auth_timeout(Duration::from_secs(11 * 60))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_huge_margin() {
        let result = base_builder()
            .token_refresh_margin(Duration::from_secs(2 * 60 * 60))
            .build();
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("margin")));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let result = base_builder()
            .retry_policy(RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            })
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let result = CoreConfig::builder()
            .settings_store(Arc::new(MemorySettingsStore::new()))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient");
            }
            other => panic!("expected missing HttpClient, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_requires_settings_store() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(StubHttpClient))
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "SettingsStore");
            }
            other => panic!("expected missing SettingsStore, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let base = std::env::temp_dir().join(format!("core-runtime-test-{}", uuid::Uuid::new_v4()));
        let db_path = base.join("settings.db");

        let config = CoreConfig::builder()
            .settings_db_path(&db_path)
            .build()
            .expect("desktop defaults should succeed");

        let settings = config.settings_store.clone();
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            settings.set_string("plugin_settings", "{}").await.unwrap();
            let value = settings.get_string("plugin_settings").await.unwrap();
            assert_eq!(value.as_deref(), Some("{}"));
        });

        drop(config);
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn test_config_is_cloneable_and_debuggable() {
        let config = base_builder().build().unwrap();
        let cloned = config.clone();
        let printed = format!("{:?}", cloned);
        assert!(printed.contains("token_refresh_margin"));
    }
}
