//! # Credential Lifecycle Manager
//!
//! Orchestrates credentials and entitlements for every backend and the Pro
//! account.
//!
//! ## Overview
//!
//! The `CredentialManager` owns the transient PKCE sessions and schedules
//! every change to the persisted records:
//!
//! - Wipes credentials whose deletion deadline passed, on every settings load
//! - Gates each backend (including its OAuth start) on its Pro feature
//! - Starts, completes and cancels authorization attempts
//! - Hands out valid access tokens, refreshing under a per-target lock
//! - Revokes credentials back to the compiled-in template
//! - Syncs entitlements and cascades lost features into deletion deadlines
//!
//! Lifecycle changes are published on the [`EventBus`].
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthTarget, BackendKind, ClientRegistrations, CredentialManager};
//! use core_runtime::config::CoreConfig;
//! use core_runtime::events::EventBus;
//! use bridge_traits::MemorySettingsStore;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let http_client: Arc<dyn bridge_traits::HttpClient> = todo!();
//! let config = CoreConfig::builder()
//!     .settings_store(Arc::new(MemorySettingsStore::new()))
//!     .http_client(http_client)
//!     .build()?;
//! let manager = CredentialManager::new(config, ClientRegistrations::from_env(), EventBus::default());
//!
//! let target = AuthTarget::Backend(BackendKind::GoogleDrive);
//! let url = manager.start_authorization(target).await?;
//! // ... host delivers the redirect ...
//! manager.on_authorization_code(target, "code").await?;
//! let token = manager.valid_access_token(target).await?;
//! # Ok(())
//! # }
//! ```

use crate::backend::BackendConfig;
use crate::callback::{CallbackParams, CallbackRegistry};
use crate::entitlement::{EntitlementResponse, ProAccount};
use crate::error::{AuthError, Result};
use crate::oauth::{
    extract_error_message, EntropySource, IssuedTokens, OAuthFlowManager, OsEntropy, PkceVerifier,
};
use crate::path::resolve_remote_base_dir;
use crate::providers::ClientRegistrations;
use crate::settings::{PluginSettings, SettingsRepository};
use crate::types::{AuthState, AuthTarget, BackendKind, FeatureTag, TokenState};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bridge_traits::presentation::{NoticeLevel, Presenter};
use bridge_traits::time::Clock;
use core_runtime::config::CoreConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EntitlementEvent, EventBus};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// An in-flight authorization attempt.
#[derive(Debug)]
struct PkceSession {
    verifier: PkceVerifier,
    started_at_ms: i64,
}

/// Outcome of applying a fresh entitlement list.
struct EntitlementChange {
    before: Vec<FeatureTag>,
    after: Vec<FeatureTag>,
    scheduled: Vec<(BackendKind, i64)>,
    cancelled: Vec<BackendKind>,
    /// Backends without a deadline field, wiped as soon as their feature lapsed
    wiped: Vec<BackendKind>,
}

/// Credential and entitlement lifecycle orchestrator.
pub struct CredentialManager {
    repository: SettingsRepository,
    flows: OAuthFlowManager,
    registrations: ClientRegistrations,
    http_client: Arc<dyn HttpClient>,
    presenter: Arc<dyn Presenter>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    event_bus: EventBus,
    /// One pending authorization attempt per target
    sessions: Mutex<HashMap<AuthTarget, PkceSession>>,
    /// Targets whose authorization code is being exchanged right now
    exchanging: Mutex<HashSet<AuthTarget>>,
    /// Targets revoked during this process lifetime
    revoked: Mutex<HashSet<AuthTarget>>,
    /// Serializes token-endpoint calls per target
    refresh_locks: Mutex<HashMap<AuthTarget, Arc<Mutex<()>>>>,
    token_refresh_margin: Duration,
    auth_timeout: Duration,
    credential_grace_period: Duration,
    refresh_check_interval: Duration,
    retry_policy: RetryPolicy,
}

impl CredentialManager {
    /// Creates a credential manager from the host bridges in `config`.
    ///
    /// # Arguments
    ///
    /// * `config` - Host bridges and lifecycle timing
    /// * `registrations` - OAuth client registrations
    /// * `event_bus` - Bus receiving [`AuthEvent`]s and [`EntitlementEvent`]s
    pub fn new(config: CoreConfig, registrations: ClientRegistrations, event_bus: EventBus) -> Self {
        let flows = OAuthFlowManager::new(
            config.http_client.clone(),
            config.clock.clone(),
            config.retry_policy.clone(),
        );

        Self {
            repository: SettingsRepository::new(config.settings_store),
            flows,
            registrations,
            http_client: config.http_client,
            presenter: config.presenter,
            clock: config.clock,
            entropy: Arc::new(OsEntropy),
            event_bus,
            sessions: Mutex::new(HashMap::new()),
            exchanging: Mutex::new(HashSet::new()),
            revoked: Mutex::new(HashSet::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            token_refresh_margin: config.token_refresh_margin,
            auth_timeout: config.auth_timeout,
            credential_grace_period: config.credential_grace_period,
            refresh_check_interval: config.refresh_check_interval,
            retry_policy: config.retry_policy,
        }
    }

    /// Replace the randomness used for verifiers and state values.
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn registrations(&self) -> &ClientRegistrations {
        &self.registrations
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Load the settings document, wiping every credential set whose
    /// deletion deadline has been reached before anything can use it.
    ///
    /// Every other operation reads settings through here.
    pub async fn load_settings(&self) -> Result<PluginSettings> {
        let now = self.now_ms();
        let (settings, wiped) = self
            .repository
            .update(|settings| {
                let wiped = settings.wipe_expired_credentials(now);
                (settings.clone(), wiped)
            })
            .await?;

        for target in wiped {
            info!(target = %target, "Wiped credentials past their deletion deadline");
            self.emit(CoreEvent::Auth(AuthEvent::CredentialsWiped {
                target: target.to_string(),
            }));
        }
        Ok(settings)
    }

    /// Normalize and store the remote base directory of `kind`.
    pub async fn set_remote_base_dir(&self, kind: BackendKind, raw: &str) -> Result<()> {
        self.repository
            .update(|settings| settings.update_backend(kind, |config| config.set_remote_base_dir(raw)))
            .await??;
        debug!(backend = %kind, "Remote base directory updated");
        Ok(())
    }

    /// Remote directory used by `kind`: the configured one, or the vault name.
    pub async fn remote_base_dir(&self, kind: BackendKind, vault_name: &str) -> Result<String> {
        let settings = self.load_settings().await?;
        let config = settings.backend(kind);
        Ok(resolve_remote_base_dir(config.remote_base_dir(), vault_name))
    }

    // ------------------------------------------------------------------
    // Entitlements
    // ------------------------------------------------------------------

    pub async fn is_feature_active(&self, feature: FeatureTag) -> Result<bool> {
        let settings = self.load_settings().await?;
        Ok(self.feature_active_in(&settings, feature))
    }

    /// Fail with `EntitlementExpired` unless `feature` is active right now.
    pub async fn ensure_feature(&self, feature: FeatureTag) -> Result<()> {
        let settings = self.load_settings().await?;
        self.require_feature(&settings, feature)
    }

    fn feature_active_in(&self, settings: &PluginSettings, feature: FeatureTag) -> bool {
        let now = self.now_ms();
        settings
            .pro
            .as_ref()
            .is_some_and(|account| account.is_feature_active(feature, now))
    }

    fn require_feature(&self, settings: &PluginSettings, feature: FeatureTag) -> Result<()> {
        if self.feature_active_in(settings, feature) {
            Ok(())
        } else {
            debug!(feature = %feature, "Feature not active");
            Err(AuthError::EntitlementExpired {
                feature: feature.to_string(),
            })
        }
    }

    fn require_target(&self, settings: &PluginSettings, target: AuthTarget) -> Result<()> {
        match target.feature() {
            Some(feature) => self.require_feature(settings, feature),
            None => Ok(()),
        }
    }

    /// Fetch the entitlement list from the licensing backend and replace the
    /// stored one wholesale. Returns the features active afterwards.
    ///
    /// Backends whose feature is no longer active get a deletion deadline
    /// `now + credential_grace_period`; a feature that comes back cancels it.
    #[instrument(skip(self))]
    pub async fn sync_entitlements(&self) -> Result<Vec<FeatureTag>> {
        let access_token = self.valid_access_token(AuthTarget::Pro).await?;
        let url = self.registrations.entitlements_url()?;

        let request = HttpRequest::new(HttpMethod::Post, url)
            .bearer_token(access_token)
            .header("Accept", "application/json")
            .json(&serde_json::json!({}))
            .map_err(|e| AuthError::Configuration(format!("Entitlement request: {e}")))?;

        let response = self
            .with_timeout("Entitlement sync", async {
                self.http_client
                    .execute_with_retry(request, self.retry_policy.clone())
                    .await
                    .map_err(|e| AuthError::TransientNetwork {
                        target: AuthTarget::Pro.to_string(),
                        message: e.to_string(),
                    })
            })
            .await?;

        if !response.is_success() {
            let message = extract_error_message(&response.body);
            warn!(status = response.status, "Entitlement sync rejected");
            return Err(if matches!(response.status, 401 | 403) {
                AuthError::AuthenticationRequired {
                    target: AuthTarget::Pro.to_string(),
                    reason: message,
                }
            } else {
                AuthError::TransientNetwork {
                    target: AuthTarget::Pro.to_string(),
                    message: format!("Entitlement sync returned {}: {message}", response.status),
                }
            });
        }

        let body: EntitlementResponse =
            response.json().map_err(|e| AuthError::TransientNetwork {
                target: AuthTarget::Pro.to_string(),
                message: format!("Failed to parse entitlement response: {e}"),
            })?;

        let now = self.now_ms();
        let grace_ms = duration_ms(self.credential_grace_period);
        let change = self
            .repository
            .update(move |settings| {
                let account = settings.pro.as_mut()?;
                let before = account.active_features(now);
                account.replace_features(body.enabled_pro_features);
                if body.email.is_some() {
                    account.email = body.email;
                }
                let after = account.active_features(now);
                let (scheduled, cancelled, wiped) = cascade_entitlements(settings, now, grace_ms);
                Some(EntitlementChange {
                    before,
                    after,
                    scheduled,
                    cancelled,
                    wiped,
                })
            })
            .await?
            .ok_or_else(|| AuthError::AuthenticationRequired {
                target: AuthTarget::Pro.to_string(),
                reason: "Pro account was signed out during sync".to_string(),
            })?;

        self.publish_entitlement_change(&change).await;
        info!(active = change.after.len(), "Entitlements synced");
        Ok(change.after)
    }

    async fn publish_entitlement_change(&self, change: &EntitlementChange) {
        for feature in change.after.iter().filter(|f| !change.before.contains(f)) {
            self.emit(CoreEvent::Entitlement(EntitlementEvent::FeatureActivated {
                feature: feature.to_string(),
            }));
        }
        for feature in change.before.iter().filter(|f| !change.after.contains(f)) {
            info!(feature = %feature, "Feature deactivated");
            self.emit(CoreEvent::Entitlement(EntitlementEvent::FeatureDeactivated {
                feature: feature.to_string(),
            }));
        }
        for (kind, at_ms) in &change.scheduled {
            warn!(backend = %kind, at_ms, "Scheduled credential deletion");
            self.emit(CoreEvent::Entitlement(EntitlementEvent::DeletionScheduled {
                backend: kind.to_string(),
                at_ms: *at_ms,
            }));
            self.notify(
                NoticeLevel::Warning,
                &format!(
                    "{} is no longer part of your plan. Its credentials will be removed.",
                    kind.display_name()
                ),
            )
            .await;
        }
        for kind in &change.cancelled {
            self.emit(CoreEvent::Entitlement(EntitlementEvent::DeletionCancelled {
                backend: kind.to_string(),
            }));
        }
        for kind in &change.wiped {
            info!(backend = %kind, "Wiped credentials of a lapsed feature");
            self.emit(CoreEvent::Auth(AuthEvent::CredentialsWiped {
                target: kind.to_string(),
            }));
        }
        self.emit(CoreEvent::Entitlement(EntitlementEvent::Synced {
            active_features: change.after.iter().map(|f| f.to_string()).collect(),
        }));
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Begin an authorization attempt and present its URL.
    ///
    /// Replaces any pending attempt for the same target, so a code issued
    /// for the old attempt can no longer be exchanged.
    ///
    /// # Errors
    ///
    /// - `EntitlementExpired` when the target's feature is not active
    /// - `Configuration` when the client registration or endpoints are unusable
    #[instrument(skip(self), fields(target = %target))]
    pub async fn start_authorization(&self, target: AuthTarget) -> Result<String> {
        let settings = self.load_settings().await?;
        self.require_target(&settings, target)?;
        let config = self.registrations.oauth_config(target, &settings)?;

        let verifier = PkceVerifier::generate(self.entropy.as_ref());
        let url = self.flows.build_auth_url(&config, &verifier)?;

        let previous = self.sessions.lock().await.insert(
            target,
            PkceSession {
                verifier,
                started_at_ms: self.now_ms(),
            },
        );
        if let Some(stale) = previous {
            debug!(
                started_at_ms = stale.started_at_ms,
                "Discarded pending authorization attempt"
            );
        }

        self.emit(CoreEvent::Auth(AuthEvent::AuthorizationStarted {
            target: target.to_string(),
        }));
        if let Err(e) = self
            .presenter
            .present_authorization_url(target.as_str(), &url)
            .await
        {
            warn!(error = %e, "Presenter could not show the authorization URL");
        }

        info!("Authorization started");
        Ok(url)
    }

    /// Drop the pending attempt for `target`. Returns whether one existed.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn cancel_authorization(&self, target: AuthTarget) -> bool {
        let cancelled = self.sessions.lock().await.remove(&target).is_some();
        if cancelled {
            info!("Authorization cancelled");
            self.emit(CoreEvent::Auth(AuthEvent::AuthorizationCancelled {
                target: target.to_string(),
            }));
        }
        cancelled
    }

    /// Exchange an authorization code delivered for `target`.
    ///
    /// Consumes the pending verifier exactly once.
    #[instrument(skip(self, code), fields(target = %target))]
    pub async fn on_authorization_code(&self, target: AuthTarget, code: &str) -> Result<()> {
        let session = self.take_session(target, None).await?;
        self.complete_authorization(target, code, session).await
    }

    /// Handle a full redirect: provider errors and `state` are checked
    /// before the code is exchanged.
    #[instrument(skip(self, params), fields(target = %target))]
    pub async fn on_authorization_callback(
        &self,
        target: AuthTarget,
        params: &CallbackParams,
    ) -> Result<()> {
        if let Some(reason) = params.error() {
            warn!(reason = %reason, "Provider reported an authorization failure");
            self.sessions.lock().await.remove(&target);
            let err = AuthError::InvalidGrant {
                target: target.to_string(),
                message: reason,
            };
            self.report_error(target, &err).await;
            return Err(err);
        }

        let code = params.code().ok_or_else(|| AuthError::InvalidGrant {
            target: target.to_string(),
            message: "callback carried no authorization code".to_string(),
        })?;
        let session = self.take_session(target, params.state()).await?;
        self.complete_authorization(target, code, session).await
    }

    async fn take_session(
        &self,
        target: AuthTarget,
        returned_state: Option<&str>,
    ) -> Result<PkceSession> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(&target).ok_or_else(|| {
            warn!("No authorization in progress");
            AuthError::NoPendingSession {
                target: target.to_string(),
            }
        })?;

        if let Some(state) = returned_state {
            if state != session.verifier.state() {
                error!("State parameter mismatch");
                sessions.insert(target, session);
                return Err(AuthError::StateMismatch {
                    target: target.to_string(),
                });
            }
        }
        Ok(session)
    }

    async fn complete_authorization(
        &self,
        target: AuthTarget,
        code: &str,
        session: PkceSession,
    ) -> Result<()> {
        let settings = self.load_settings().await?;
        self.require_target(&settings, target)?;
        let config = self.registrations.oauth_config(target, &settings)?;

        self.exchanging.lock().await.insert(target);
        let exchanged = self
            .with_timeout(
                "Authorization code exchange",
                self.flows.exchange_code(&config, code, &session.verifier),
            )
            .await;
        self.exchanging.lock().await.remove(&target);

        let tokens = match exchanged {
            Ok(tokens) => tokens,
            Err(e) => {
                self.report_error(target, &e).await;
                return Err(e);
            }
        };

        let lock = self.refresh_lock(target).await;
        let _guard = lock.lock().await;
        self.store_tokens(target, &tokens, true).await?;
        self.revoked.lock().await.remove(&target);

        info!("Signed in");
        self.emit(CoreEvent::Auth(AuthEvent::SignedIn {
            target: target.to_string(),
        }));
        Ok(())
    }

    /// Register one callback handler per OAuth target.
    pub fn register_callbacks(self: &Arc<Self>, registry: &mut CallbackRegistry) {
        let targets = BackendKind::ALL
            .into_iter()
            .filter(BackendKind::is_oauth)
            .map(AuthTarget::Backend)
            .chain(std::iter::once(AuthTarget::Pro));

        for target in targets {
            let manager = Arc::clone(self);
            registry.register(target.callback_id(), move |params: CallbackParams| {
                let manager = Arc::clone(&manager);
                async move { manager.on_authorization_callback(target, &params).await }
            });
        }
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Access credential for `target`, refreshed first when stale.
    ///
    /// Static-key backends return their stored key. Concurrent callers for
    /// the same target share one token-endpoint call.
    ///
    /// # Errors
    ///
    /// - `EntitlementExpired` when the target's feature is not active
    /// - `AuthenticationRequired` when there is nothing to refresh with or
    ///   the provider rejected the refresh token
    /// - `TransientNetwork` / `OperationTimeout` when refresh kept failing
    #[instrument(skip(self), fields(target = %target))]
    pub async fn valid_access_token(&self, target: AuthTarget) -> Result<String> {
        let settings = self.load_settings().await?;
        self.require_target(&settings, target)?;

        if let Some(key) = static_key(target, &settings) {
            return key;
        }

        let state = self.token_state(target, &settings)?;
        if state.is_fresh(self.now_ms(), self.margin_ms()) {
            return Ok(state.access_token);
        }

        let lock = self.refresh_lock(target).await;
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let settings = self.load_settings().await?;
        let state = self.token_state(target, &settings)?;
        if state.is_fresh(self.now_ms(), self.margin_ms()) {
            debug!("Token refreshed by a concurrent caller");
            return Ok(state.access_token);
        }

        self.refresh_locked(target, &settings, state).await
    }

    /// Refresh with the target lock held.
    async fn refresh_locked(
        &self,
        target: AuthTarget,
        settings: &PluginSettings,
        state: TokenState,
    ) -> Result<String> {
        let Some(refresh_token) = state.refresh_token.filter(|t| !t.is_empty()) else {
            return Err(self
                .require_reauthorization(target, "no refresh token stored".to_string())
                .await);
        };
        let config = self.registrations.oauth_config(target, settings)?;

        self.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing {
            target: target.to_string(),
        }));

        let refreshed = self
            .with_timeout("Token refresh", self.flows.refresh(&config, &refresh_token))
            .await;

        match refreshed {
            Ok(tokens) => {
                self.store_tokens(target, &tokens, false).await?;
                self.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
                    target: target.to_string(),
                    expires_at_ms: tokens.expires_at_ms(),
                }));
                Ok(tokens.access_token)
            }
            Err(AuthError::InvalidGrant { message, .. }) => {
                Err(self.require_reauthorization(target, message).await)
            }
            Err(e) => {
                self.report_error(target, &e).await;
                Err(e)
            }
        }
    }

    /// Clear stale tokens and tell the user to sign in again.
    async fn require_reauthorization(&self, target: AuthTarget, reason: String) -> AuthError {
        warn!(target = %target, reason = %reason, "Re-authorization required");

        let cleared = self
            .repository
            .update(|settings| match target {
                AuthTarget::Backend(kind) => {
                    settings.update_backend(kind, BackendConfig::clear_credentials)
                }
                AuthTarget::Pro => {
                    if let Some(account) = settings.pro.as_mut() {
                        account.access_token.clear();
                        account.refresh_token = None;
                        account.access_token_expires_in_ms = 0;
                        account.access_token_expires_at_time_ms = 0;
                    }
                }
            })
            .await;
        if let Err(e) = cleared {
            error!(error = %e, "Failed to clear stale credentials");
        }

        self.emit(CoreEvent::Auth(AuthEvent::ReauthorizationRequired {
            target: target.to_string(),
            message: reason.clone(),
        }));
        let err = AuthError::AuthenticationRequired {
            target: target.to_string(),
            reason,
        };
        self.notify(NoticeLevel::Error, &err.user_message()).await;
        err
    }

    /// Refresh every token that is due: the active backend and the Pro
    /// account. Failures are logged and reported per target.
    pub async fn refresh_due_tokens(&self) -> Result<Vec<AuthTarget>> {
        let settings = self.load_settings().await?;
        let now = self.now_ms();
        let margin = self.margin_ms();

        let mut candidates = Vec::new();
        if let Some(kind) = settings.active_backend().filter(BackendKind::is_oauth) {
            if self.feature_active_in(&settings, kind.feature()) {
                candidates.push(AuthTarget::Backend(kind));
            }
        }
        if settings.pro.is_some() {
            candidates.push(AuthTarget::Pro);
        }

        let mut refreshed = Vec::new();
        for target in candidates {
            let Ok(state) = self.token_state(target, &settings) else {
                continue;
            };
            if state.is_fresh(now, margin) || !state.has_refresh_token() {
                continue;
            }
            match self.valid_access_token(target).await {
                Ok(_) => refreshed.push(target),
                Err(e) => warn!(target = %target, error = %e, "Proactive refresh failed"),
            }
        }
        Ok(refreshed)
    }

    /// Run [`Self::refresh_due_tokens`] every `refresh_check_interval` until
    /// `cancel` fires.
    pub fn spawn_refresh_scheduler(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = self.refresh_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Token refresh scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.refresh_due_tokens().await {
                            warn!(error = %e, "Scheduled token refresh failed");
                        }
                    }
                }
            }
            info!("Token refresh scheduler stopped");
        })
    }

    // ------------------------------------------------------------------
    // Revocation and state
    // ------------------------------------------------------------------

    /// Reset `target` to its compiled-in template.
    ///
    /// Upstream revocation is attempted first where the provider offers it,
    /// and its outcome never blocks the local reset. Revoking an already
    /// default record changes nothing.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn revoke(&self, target: AuthTarget) -> Result<()> {
        if self.sessions.lock().await.remove(&target).is_some() {
            debug!("Dropped pending authorization attempt");
        }

        let lock = self.refresh_lock(target).await;
        let _guard = lock.lock().await;
        let settings = self.load_settings().await?;

        let upstream_token = match target {
            AuthTarget::Backend(kind) => {
                if self.registrations.is_template(&settings.backend(kind)) {
                    debug!("Already at defaults");
                    return Ok(());
                }
                settings.backend(kind).token_state()
            }
            AuthTarget::Pro => match settings.pro.as_ref() {
                None => {
                    debug!("No Pro account stored");
                    return Ok(());
                }
                Some(account) => Some(account.token_state()),
            },
        };

        if let Some(state) = upstream_token {
            let token = state.refresh_token.unwrap_or(state.access_token);
            if !token.is_empty() {
                self.revoke_upstream(target, &settings, &token).await;
            }
        }

        let template = match target {
            AuthTarget::Backend(kind) => Some(self.registrations.template_for(kind)),
            AuthTarget::Pro => None,
        };
        self.repository
            .update(move |settings| match template {
                Some(template) => settings.set_backend(template),
                None => settings.pro = None,
            })
            .await?;

        self.revoked.lock().await.insert(target);
        info!("Credentials revoked");
        self.emit(CoreEvent::Auth(AuthEvent::Revoked {
            target: target.to_string(),
        }));
        Ok(())
    }

    async fn revoke_upstream(&self, target: AuthTarget, settings: &PluginSettings, token: &str) {
        let config = match self.registrations.oauth_config(target, settings) {
            Ok(config) => config,
            Err(e) => {
                debug!(error = %e, "Skipping upstream revocation");
                return;
            }
        };
        if let Err(e) = self
            .with_timeout("Token revocation", self.flows.revoke(&config, token))
            .await
        {
            warn!(error = %e, "Upstream revocation failed, clearing locally anyway");
        }
    }

    /// Current lifecycle state of `target`.
    pub async fn auth_state(&self, target: AuthTarget) -> Result<AuthState> {
        if self.exchanging.lock().await.contains(&target) {
            return Ok(AuthState::ExchangingCode);
        }
        if self.sessions.lock().await.contains_key(&target) {
            return Ok(AuthState::AwaitingUserAuthorization);
        }

        let settings = self.load_settings().await?;
        let (has_credentials, token) = match target {
            AuthTarget::Backend(kind) => {
                let config = settings.backend(kind);
                (config.has_credentials(), config.token_state())
            }
            AuthTarget::Pro => match settings.pro.as_ref() {
                Some(account) => {
                    let state = account.token_state();
                    (!state.access_token.is_empty() || state.has_refresh_token(), Some(state))
                }
                None => (false, None),
            },
        };

        if !has_credentials {
            return Ok(if self.revoked.lock().await.contains(&target) {
                AuthState::Revoked
            } else {
                AuthState::Unauthenticated
            });
        }

        Ok(match token {
            None => AuthState::Authenticated,
            Some(state) if state.is_fresh(self.now_ms(), self.margin_ms()) => {
                AuthState::Authenticated
            }
            Some(state) if state.has_refresh_token() => AuthState::RefreshPending,
            Some(_) => AuthState::Unauthenticated,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn token_state(&self, target: AuthTarget, settings: &PluginSettings) -> Result<TokenState> {
        let state = match target {
            AuthTarget::Backend(kind) => settings.backend(kind).token_state(),
            AuthTarget::Pro => settings.pro.as_ref().map(ProAccount::token_state),
        };
        state
            .filter(|s| !s.access_token.is_empty() || s.has_refresh_token())
            .ok_or_else(|| AuthError::AuthenticationRequired {
                target: target.to_string(),
                reason: "not signed in".to_string(),
            })
    }

    /// Write a token tuple in one settings update. A new sign-in also
    /// clears any pending deletion deadline.
    async fn store_tokens(
        &self,
        target: AuthTarget,
        tokens: &IssuedTokens,
        new_sign_in: bool,
    ) -> Result<()> {
        self.repository
            .update(|settings| match target {
                AuthTarget::Pro => {
                    let account = settings.pro.get_or_insert_with(ProAccount::default);
                    account.apply_tokens(tokens);
                    if new_sign_in {
                        account.credentials_should_be_deleted_at_time_ms = None;
                    }
                    Ok(())
                }
                AuthTarget::Backend(kind) => settings.update_backend(kind, |config| {
                    config.apply_tokens(tokens)?;
                    if new_sign_in {
                        config.clear_deletion_schedule();
                    }
                    Ok(())
                }),
            })
            .await?
    }

    async fn refresh_lock(&self, target: AuthTarget) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(
            locks
                .entry(target)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match timeout(self.auth_timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                error!(operation, "Operation timed out");
                Err(AuthError::OperationTimeout {
                    operation: operation.to_string(),
                    timeout_secs: self.auth_timeout.as_secs(),
                })
            }
        }
    }

    async fn report_error(&self, target: AuthTarget, err: &AuthError) {
        self.emit(CoreEvent::Auth(AuthEvent::AuthError {
            target: Some(target.to_string()),
            message: err.to_string(),
            recoverable: err.is_retryable(),
        }));
        let level = if err.is_retryable() {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Error
        };
        self.notify(level, &err.user_message()).await;
    }

    async fn notify(&self, level: NoticeLevel, message: &str) {
        if let Err(e) = self.presenter.notify(level, message).await {
            debug!(error = %e, "Presenter could not show notice");
        }
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_bus.emit(event);
    }

    fn now_ms(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn margin_ms(&self) -> i64 {
        duration_ms(self.token_refresh_margin)
    }
}

/// Stored key of a static-key backend, `None` for OAuth targets.
fn static_key(target: AuthTarget, settings: &PluginSettings) -> Option<Result<String>> {
    let missing = |kind: BackendKind| AuthError::AuthenticationRequired {
        target: kind.to_string(),
        reason: "no access key configured".to_string(),
    };
    match target {
        AuthTarget::Backend(BackendKind::PCloud) => Some(
            Some(settings.pcloud.access_token.clone())
                .filter(|key| !key.is_empty())
                .ok_or_else(|| missing(BackendKind::PCloud)),
        ),
        AuthTarget::Backend(BackendKind::AzureBlobStorage) => Some(
            Some(settings.azureblobstorage.container_sas_url.clone())
                .filter(|url| !url.is_empty())
                .ok_or_else(|| missing(BackendKind::AzureBlobStorage)),
        ),
        _ => None,
    }
}

/// Schedule or cancel credential deletion for every gated backend after
/// an entitlement change. Records with no deadline field are wiped at once.
fn cascade_entitlements(
    settings: &mut PluginSettings,
    now_ms: i64,
    grace_ms: i64,
) -> (Vec<(BackendKind, i64)>, Vec<BackendKind>, Vec<BackendKind>) {
    let mut scheduled = Vec::new();
    let mut cancelled = Vec::new();
    let mut wiped = Vec::new();

    for kind in BackendKind::ALL {
        let active = settings
            .pro
            .as_ref()
            .is_some_and(|account| account.is_feature_active(kind.feature(), now_ms));

        settings.update_backend(kind, |config| match config.deletion_deadline() {
            None if !active && config.has_credentials() => {
                let at_ms = now_ms.saturating_add(grace_ms);
                if config.schedule_deletion(at_ms) {
                    scheduled.push((kind, at_ms));
                } else {
                    config.clear_credentials();
                    wiped.push(kind);
                }
            }
            Some(_) if active => {
                config.clear_deletion_schedule();
                cancelled.push(kind);
            }
            _ => {}
        });
    }
    (scheduled, cancelled, wiped)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::FeatureInfo;
    use crate::oauth::tests::CountingEntropy;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::HttpResponse;
    use bridge_traits::storage::{MemorySettingsStore, SettingsStore};
    use bridge_traits::time::ManualClock;
    use std::sync::Mutex as StdMutex;

    const T0: i64 = 1_700_000_000_000;

    /// Replies with queued responses and records every request.
    #[derive(Default)]
    struct ScriptedHttpClient {
        responses: StdMutex<Vec<HttpResponse>>,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl ScriptedHttpClient {
        fn push(&self, status: u16, body: &'static str) {
            self.responses
                .lock()
                .unwrap()
                .insert(0, HttpResponse::new(status, body));
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().pop().ok_or_else(|| {
                bridge_traits::BridgeError::NotAvailable("no scripted response".into())
            })
        }
    }

    struct Harness {
        manager: CredentialManager,
        http: Arc<ScriptedHttpClient>,
        clock: Arc<ManualClock>,
        store: Arc<MemorySettingsStore>,
    }

    fn harness() -> Harness {
        let http = Arc::new(ScriptedHttpClient::default());
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemorySettingsStore::new());
        let config = CoreConfig::builder()
            .settings_store(store.clone())
            .http_client(http.clone())
            .clock(clock.clone())
            .retry_policy(RetryPolicy::no_retry())
            .build()
            .unwrap();
        let registrations = ClientRegistrations {
            box_: crate::providers::ClientCredentials::new("box-client", None),
            onedrive_client_id: "od-client".into(),
            onedrive_authority: "https://login.microsoftonline.com/common".into(),
            pro_client_id: "pro-client".into(),
            pro_website: "https://cloudsync.example".into(),
            ..Default::default()
        };
        let manager = CredentialManager::new(config, registrations, EventBus::default())
            .with_entropy(Arc::new(CountingEntropy::new()));
        Harness {
            manager,
            http,
            clock,
            store,
        }
    }

    async fn grant(h: &Harness, features: &[FeatureTag]) {
        let features = features
            .iter()
            .map(|tag| FeatureInfo::new(*tag, T0 - 1, T0 + 86_400_000).unwrap())
            .collect();
        h.manager
            .repository
            .update(|settings| {
                settings.pro = Some(ProAccount {
                    access_token: "pro-at".into(),
                    refresh_token: Some("pro-rt".into()),
                    access_token_expires_at_time_ms: T0 + 3_600_000,
                    enabled_pro_features: features,
                    ..Default::default()
                })
            })
            .await
            .unwrap();
    }

    const BOX: AuthTarget = AuthTarget::Backend(BackendKind::Box);

    #[tokio::test]
    async fn test_start_requires_feature() {
        let h = harness();
        let err = h.manager.start_authorization(BOX).await.unwrap_err();
        assert!(matches!(err, AuthError::EntitlementExpired { .. }));
        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_sign_in_flow() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;

        let url = h.manager.start_authorization(BOX).await.unwrap();
        assert!(url.starts_with("https://account.box.com/api/oauth2/authorize?"));
        assert_eq!(
            h.manager.auth_state(BOX).await.unwrap(),
            AuthState::AwaitingUserAuthorization
        );

        h.http.push(
            200,
            r#"{"access_token":"box-at","refresh_token":"box-rt","expires_in":3600}"#,
        );
        h.manager.on_authorization_code(BOX, "code-1").await.unwrap();

        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::Authenticated);
        assert_eq!(h.manager.valid_access_token(BOX).await.unwrap(), "box-at");

        let settings = h.manager.load_settings().await.unwrap();
        let state = settings.backend(BackendKind::Box).token_state().unwrap();
        assert_eq!(state.expires_at_ms, T0 + 3_600_000);

        let err = h.manager.on_authorization_code(BOX, "code-1").await.unwrap_err();
        assert!(matches!(err, AuthError::NoPendingSession { .. }));
    }

    #[tokio::test]
    async fn test_callback_checks_state_and_provider_error() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager.start_authorization(BOX).await.unwrap();

        let forged = CallbackParams::new().with("code", "c").with("state", "nope");
        let err = h
            .manager
            .on_authorization_callback(BOX, &forged)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch { .. }));
        assert_eq!(
            h.manager.auth_state(BOX).await.unwrap(),
            AuthState::AwaitingUserAuthorization
        );

        let denied = CallbackParams::new().with("error", "access_denied");
        let err = h
            .manager
            .on_authorization_callback(BOX, &denied)
            .await
            .unwrap_err();
        assert!(err.requires_reauthorization());
        assert!(h.http.requests().is_empty());
        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_cancel_clears_session() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager.start_authorization(BOX).await.unwrap();

        assert!(h.manager.cancel_authorization(BOX).await);
        assert!(!h.manager.cancel_authorization(BOX).await);
        assert!(matches!(
            h.manager.on_authorization_code(BOX, "late").await,
            Err(AuthError::NoPendingSession { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_grant_clears_tokens() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager.start_authorization(BOX).await.unwrap();
        h.http
            .push(200, r#"{"access_token":"at","refresh_token":"rt","expires_in":60}"#);
        h.manager.on_authorization_code(BOX, "code").await.unwrap();
        h.manager.set_remote_base_dir(BackendKind::Box, "/Notes/").await.unwrap();

        h.clock.advance(Duration::from_secs(120));
        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::RefreshPending);

        h.http.push(400, r#"{"error":"invalid_grant"}"#);
        let err = h.manager.valid_access_token(BOX).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationRequired { .. }));

        let settings = h.manager.load_settings().await.unwrap();
        let config = settings.backend(BackendKind::Box);
        assert!(!config.has_credentials());
        assert_eq!(config.remote_base_dir().unwrap().as_str(), "Notes");
        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_static_backends_return_stored_key() {
        let h = harness();
        grant(&h, &[FeatureTag::PCloud]).await;
        let pcloud = AuthTarget::Backend(BackendKind::PCloud);

        assert!(matches!(
            h.manager.valid_access_token(pcloud).await,
            Err(AuthError::AuthenticationRequired { .. })
        ));

        h.manager
            .repository
            .update(|s| s.pcloud.access_token = "pcloud-key".into())
            .await
            .unwrap();
        assert_eq!(h.manager.valid_access_token(pcloud).await.unwrap(), "pcloud-key");
        assert!(matches!(
            h.manager.start_authorization(pcloud).await,
            Err(AuthError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_entitlements_cascades_deletion() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager
            .repository
            .update(|s| s.box_.credentials.access_token = "box-at".into())
            .await
            .unwrap();
        let mut events = h.manager.event_bus().subscribe();

        h.http.push(200, r#"{"enabledProFeatures":[]}"#);
        let active = h.manager.sync_entitlements().await.unwrap();
        assert!(active.is_empty());

        let request = &h.http.requests()[0];
        assert_eq!(request.url, "https://cloudsync.example/api/v1/pro/features");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer pro-at")
        );

        let grace = duration_ms(core_runtime::config::DEFAULT_CREDENTIAL_GRACE_PERIOD);
        let settings = h.manager.load_settings().await.unwrap();
        assert_eq!(
            settings.backend(BackendKind::Box).deletion_deadline(),
            Some(T0 + grace)
        );
        assert!(!h.manager.is_feature_active(FeatureTag::Box).await.unwrap());

        let mut saw_deactivated = false;
        let mut saw_scheduled = false;
        while let Ok(event) = events.try_recv() {
            match event {
                CoreEvent::Entitlement(EntitlementEvent::FeatureDeactivated { feature }) => {
                    saw_deactivated |= feature == "feature-box"
                }
                CoreEvent::Entitlement(EntitlementEvent::DeletionScheduled { backend, .. }) => {
                    saw_scheduled |= backend == "box"
                }
                _ => {}
            }
        }
        assert!(saw_deactivated && saw_scheduled);

        h.clock.advance(core_runtime::config::DEFAULT_CREDENTIAL_GRACE_PERIOD);
        let settings = h.manager.load_settings().await.unwrap();
        assert!(!settings.backend(BackendKind::Box).has_credentials());
    }

    #[tokio::test]
    async fn test_lapsed_azure_feature_wipes_sas_url() {
        let h = harness();
        grant(&h, &[FeatureTag::AzureBlobStorage]).await;
        h.manager
            .repository
            .update(|s| {
                s.azureblobstorage.container_sas_url = "https://acct.blob/c?sig=x".into();
                s.azureblobstorage.container_name = "c".into();
            })
            .await
            .unwrap();
        let mut events = h.manager.event_bus().subscribe();

        h.http.push(200, r#"{"enabledProFeatures":[]}"#);
        h.manager.sync_entitlements().await.unwrap();

        let settings = h.manager.load_settings().await.unwrap();
        assert!(settings.azureblobstorage.container_sas_url.is_empty());
        assert_eq!(settings.azureblobstorage.container_name, "c");

        let mut saw_wiped = false;
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::Auth(AuthEvent::CredentialsWiped { target }) = event {
                saw_wiped |= target == "azureblobstorage";
            }
        }
        assert!(saw_wiped);
    }

    #[tokio::test]
    async fn test_onedrive_start_on_fresh_vault_uses_registration() {
        let h = harness();
        grant(&h, &[FeatureTag::OnedriveFull]).await;
        let onedrive = AuthTarget::Backend(BackendKind::OnedriveFull);

        let url = h.manager.start_authorization(onedrive).await.unwrap();
        assert!(url.starts_with(
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"
        ));
        assert!(url.contains("client_id=od-client"));
    }

    #[tokio::test]
    async fn test_revoke_of_untouched_onedrive_is_noop() {
        let h = harness();
        h.manager
            .repository
            .update(|s| s.service_type = "onedrivefull".into())
            .await
            .unwrap();
        let before = h.store.get_string(crate::settings::SETTINGS_KEY).await.unwrap();
        let mut events = h.manager.event_bus().subscribe();

        h.manager
            .revoke(AuthTarget::Backend(BackendKind::OnedriveFull))
            .await
            .unwrap();

        let after = h.store.get_string(crate::settings::SETTINGS_KEY).await.unwrap();
        assert_eq!(before, after);
        assert!(events.try_recv().is_err());
        assert!(h.http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reactivated_feature_cancels_deletion() {
        let h = harness();
        grant(&h, &[]).await;
        h.manager
            .repository
            .update(|s| {
                s.googledrive.credentials.access_token = "gd-at".into();
                s.googledrive.credentials.credentials_should_be_deleted_at_time_ms =
                    Some(T0 + 1_000_000);
            })
            .await
            .unwrap();

        h.http.push(
            200,
            r#"{"enabledProFeatures":[{"featureName":"feature-google_drive","enableAtTimeMs":"0","expireAtTimeMs":"9999999999999"}]}"#,
        );
        let active = h.manager.sync_entitlements().await.unwrap();
        assert_eq!(active, vec![FeatureTag::GoogleDrive]);

        let settings = h.manager.load_settings().await.unwrap();
        assert_eq!(
            settings.backend(BackendKind::GoogleDrive).deletion_deadline(),
            None
        );
    }

    #[tokio::test]
    async fn test_revoke_resets_to_template() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager
            .repository
            .update(|s| {
                s.box_.credentials.refresh_token = "box-rt".into();
                s.box_.credentials.access_token = "box-at".into();
            })
            .await
            .unwrap();

        h.http.push(200, "");
        h.manager.revoke(BOX).await.unwrap();
        assert_eq!(h.http.requests()[0].url, "https://api.box.com/oauth2/revoke");

        let settings = h.manager.load_settings().await.unwrap();
        assert_eq!(
            settings.backend(BackendKind::Box),
            BackendConfig::default_for(BackendKind::Box)
        );
        assert_eq!(h.manager.auth_state(BOX).await.unwrap(), AuthState::Revoked);

        let before = h.store.get_string(crate::settings::SETTINGS_KEY).await.unwrap();
        h.manager.revoke(BOX).await.unwrap();
        let after = h.store.get_string(crate::settings::SETTINGS_KEY).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(h.http.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_clears_locally_when_upstream_fails() {
        let h = harness();
        h.manager
            .repository
            .update(|s| s.box_.credentials.refresh_token = "box-rt".into())
            .await
            .unwrap();

        h.http.push(503, "down");
        h.manager.revoke(BOX).await.unwrap();
        let settings = h.manager.load_settings().await.unwrap();
        assert!(!settings.backend(BackendKind::Box).has_credentials());
    }

    #[tokio::test]
    async fn test_remote_base_dir_fallback() {
        let h = harness();
        assert_eq!(
            h.manager
                .remote_base_dir(BackendKind::Koofr, "My Vault")
                .await
                .unwrap(),
            "My Vault"
        );
        h.manager
            .set_remote_base_dir(BackendKind::Koofr, " / Sync // Notes / ")
            .await
            .unwrap();
        assert_eq!(
            h.manager
                .remote_base_dir(BackendKind::Koofr, "My Vault")
                .await
                .unwrap(),
            "Sync/Notes"
        );
        assert!(h
            .manager
            .set_remote_base_dir(BackendKind::AzureBlobStorage, "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refresh_due_tokens_only_touches_stale_targets() {
        let h = harness();
        grant(&h, &[FeatureTag::Box]).await;
        h.manager
            .repository
            .update(|s| {
                s.service_type = "box".into();
                s.box_.credentials.access_token = "old".into();
                s.box_.credentials.refresh_token = "rt".into();
                s.box_.credentials.access_token_expires_at_time_ms = T0 + 1_000;
            })
            .await
            .unwrap();

        h.http.push(200, r#"{"access_token":"new","expires_in":3600}"#);
        let refreshed = h.manager.refresh_due_tokens().await.unwrap();
        assert_eq!(refreshed, vec![BOX]);
        assert_eq!(h.http.requests().len(), 1);

        let refreshed = h.manager.refresh_due_tokens().await.unwrap();
        assert!(refreshed.is_empty());
    }

    #[tokio::test]
    async fn test_registered_callbacks_reach_manager() {
        let h = harness();
        let manager = Arc::new(h.manager);
        let mut registry = CallbackRegistry::new();
        manager.register_callbacks(&mut registry);

        assert!(registry.is_registered("cloud-sync-cb-box"));
        assert!(registry.is_registered("cloud-sync-cb-pro"));
        assert!(!registry.is_registered("cloud-sync-cb-pcloud"));

        let err = registry
            .dispatch("cloud-sync-cb-box", CallbackParams::new().with("code", "c"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::CallbackError::Auth(AuthError::NoPendingSession { .. })
        ));
    }
}
