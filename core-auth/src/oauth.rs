//! OAuth 2.0 Authorization Flow Engine with PKCE Support
//!
//! This module implements RFC 6749 (OAuth 2.0) and RFC 7636 (PKCE) for the
//! authorization-code flows of the OAuth backends and the Pro account.
//!
//! # Overview
//!
//! The flow manager handles:
//! - Generating verifier/challenge pairs from an injectable entropy source
//! - Building authorization URLs (fails fast on bad configuration)
//! - Exchanging authorization codes for tokens (single attempt)
//! - Refreshing access tokens with bounded exponential backoff
//! - Best-effort upstream token revocation
//!
//! # Security
//!
//! - Verifiers come from the OS CSPRNG by default
//! - Codes, verifiers, tokens and client secrets are never logged
//!
//! # Example
//!
//! ```no_run
//! use core_auth::oauth::{OAuthConfig, OAuthFlowManager, OsEntropy, PkceVerifier};
//! use core_auth::{AuthTarget, BackendKind};
//! use bridge_traits::http::RetryPolicy;
//! use bridge_traits::time::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = OAuthConfig {
//!     target: AuthTarget::Backend(BackendKind::Box),
//!     client_id: "your-client-id".to_string(),
//!     client_secret: Some("your-client-secret".to_string()),
//!     redirect_uri: "obsidian://cloud-sync-cb-box".to_string(),
//!     scopes: vec![],
//!     auth_url: "https://account.box.com/api/oauth2/authorize".to_string(),
//!     token_url: "https://api.box.com/oauth2/token".to_string(),
//!     revoke_url: None,
//!     extra_auth_params: vec![],
//! };
//!
//! let flows = OAuthFlowManager::new(http_client, Arc::new(SystemClock), RetryPolicy::default());
//! let verifier = PkceVerifier::generate(&OsEntropy);
//! let auth_url = flows.build_auth_url(&config, &verifier)?;
//! // Hand auth_url to the user, then on callback:
//! let tokens = flows.exchange_code(&config, "code-from-callback", &verifier).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::AuthTarget;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::time::Clock;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;
const ERROR_SNIPPET_CHARS: usize = 200;

/// Source of unpredictable bytes for verifiers and state values.
pub trait EntropySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);
}

/// Operating system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// OAuth 2.0 client configuration for one target.
#[derive(Clone)]
pub struct OAuthConfig {
    pub target: AuthTarget,
    pub client_id: String,
    /// Client secret (optional for public clients)
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    /// Revocation endpoint, when the provider publishes one
    pub revoke_url: Option<String>,
    /// Provider-specific authorization query parameters
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Reject configurations that cannot possibly work, before any network call.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(format!(
                "{} client id is empty",
                self.target
            )));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(AuthError::Configuration(format!(
                "{} redirect URI is empty",
                self.target
            )));
        }
        parse_endpoint(self.target, "authorization", &self.auth_url)?;
        parse_endpoint(self.target, "token", &self.token_url)?;
        Ok(())
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("target", &self.target)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("revoke_url", &self.revoke_url)
            .finish()
    }
}

fn parse_endpoint(target: AuthTarget, name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        AuthError::Configuration(format!("{target} {name} endpoint {raw:?} is invalid: {e}"))
    })?;
    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(AuthError::Configuration(format!(
            "{target} {name} endpoint {raw:?} is not an http(s) URL"
        )));
    }
    Ok(url)
}

/// PKCE (Proof Key for Code Exchange) verifier plus the CSRF `state`.
///
/// The verifier never leaves the process except in the token request.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// 32 random bytes for the verifier (43 URL-safe characters) and 16 for
    /// the state, both base64url without padding.
    pub fn generate(entropy: &dyn EntropySource) -> Self {
        let mut verifier_bytes = [0u8; VERIFIER_BYTES];
        entropy.fill(&mut verifier_bytes);
        let mut state_bytes = [0u8; STATE_BYTES];
        entropy.fill(&mut state_bytes);

        Self {
            verifier: URL_SAFE_NO_PAD.encode(verifier_bytes),
            state: URL_SAFE_NO_PAD.encode(state_bytes),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// S256 challenge: BASE64URL(SHA256(verifier)).
    pub fn challenge(&self) -> String {
        let hash = Sha256::digest(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceVerifier")
            .field("verifier", &"[REDACTED]")
            .field("state", &self.state)
            .finish()
    }
}

/// Tokens returned by a successful exchange or refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    /// `None` when the provider did not issue (or rotate) a refresh token
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
    /// Epoch milliseconds at which the response was received
    pub issued_at_ms: i64,
}

impl IssuedTokens {
    pub fn expires_in_ms(&self) -> i64 {
        self.expires_in_secs.max(0).saturating_mul(1000)
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.issued_at_ms.saturating_add(self.expires_in_ms())
    }
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in_secs", &self.expires_in_secs)
            .field("issued_at_ms", &self.issued_at_ms)
            .finish()
    }
}

/// OAuth 2.0 flow engine, shared by every target.
pub struct OAuthFlowManager {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
}

impl OAuthFlowManager {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http_client,
            clock,
            retry_policy,
        }
    }

    /// Build the authorization URL embedding the S256 challenge and state.
    ///
    /// # Errors
    ///
    /// `AuthError::Configuration` when the client id is blank or an endpoint
    /// is not an absolute http(s) URL.
    #[instrument(skip(self, config, verifier), fields(target = %config.target))]
    pub fn build_auth_url(&self, config: &OAuthConfig, verifier: &PkceVerifier) -> Result<String> {
        config.validate()?;
        let mut url = parse_endpoint(config.target, "authorization", &config.auth_url)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", config.client_id.trim());
            query.append_pair("redirect_uri", &config.redirect_uri);
            query.append_pair("response_type", "code");
            if !config.scopes.is_empty() {
                query.append_pair("scope", &config.scopes.join(" "));
            }
            query.append_pair("state", verifier.state());
            query.append_pair("code_challenge", &verifier.challenge());
            query.append_pair("code_challenge_method", "S256");
            for (key, value) in &config.extra_auth_params {
                query.append_pair(key, value);
            }
        }

        debug!("Built authorization URL");
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Authorization codes are single use, so this makes exactly one attempt.
    #[instrument(skip(self, config, code, verifier), fields(target = %config.target))]
    pub async fn exchange_code(
        &self,
        config: &OAuthConfig,
        code: &str,
        verifier: &PkceVerifier,
    ) -> Result<IssuedTokens> {
        config.validate()?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("client_id", config.client_id.trim()),
            ("code_verifier", verifier.verifier()),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        let request = form_request(config, &config.token_url, &params)?;

        debug!("Exchanging authorization code for tokens");
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| transport_error(config.target, e))?;

        if !response.is_success() {
            return Err(status_error(config.target, &response, "Token exchange"));
        }

        let tokens = self.parse_token_response(config.target, &response, None)?;
        info!(
            expires_in_secs = tokens.expires_in_secs,
            "Exchanged authorization code for tokens"
        );
        Ok(tokens)
    }

    /// Obtain a new access token with a refresh token.
    ///
    /// Transport failures, 408, 429 and 5xx are retried with the configured
    /// backoff. Any other 4xx is `InvalidGrant` and never retried. When the
    /// provider does not rotate the refresh token, the old one is returned.
    #[instrument(skip(self, config, refresh_token), fields(target = %config.target))]
    pub async fn refresh(&self, config: &OAuthConfig, refresh_token: &str) -> Result<IssuedTokens> {
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidGrant {
                target: config.target.to_string(),
                message: "no refresh token stored".to_string(),
            });
        }

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", config.client_id.trim()),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        let request = form_request(config, &config.token_url, &params)?;

        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, "Refreshing access token");

            let last_error = match self.http_client.execute(request.clone()).await {
                Ok(response) if response.is_success() => {
                    let tokens =
                        self.parse_token_response(config.target, &response, Some(refresh_token))?;
                    info!(
                        expires_in_secs = tokens.expires_in_secs,
                        rotated = tokens.refresh_token.as_deref() != Some(refresh_token),
                        "Refreshed access token"
                    );
                    return Ok(tokens);
                }
                Ok(response) if !response.is_retryable() => {
                    return Err(status_error(config.target, &response, "Token refresh"));
                }
                Ok(response) => status_error(config.target, &response, "Token refresh"),
                Err(e) if e.is_transient() => transport_error(config.target, e),
                Err(e) => return Err(transport_error(config.target, e)),
            };

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %last_error, "Token refresh gave up");
                return Err(last_error);
            }

            let delay = self.retry_policy.delay_for_attempt(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Ask the provider to revoke `token`. A no-op without a revocation
    /// endpoint. Callers treat failures as advisory.
    #[instrument(skip(self, config, token), fields(target = %config.target))]
    pub async fn revoke(&self, config: &OAuthConfig, token: &str) -> Result<()> {
        let Some(revoke_url) = config.revoke_url.as_deref() else {
            return Ok(());
        };
        if token.is_empty() {
            return Ok(());
        }

        let mut params = vec![("token", token), ("client_id", config.client_id.trim())];
        if let Some(secret) = config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        let request = form_request(config, revoke_url, &params)?;

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| transport_error(config.target, e))?;

        if !response.is_success() {
            return Err(status_error(config.target, &response, "Token revocation"));
        }
        debug!("Upstream token revoked");
        Ok(())
    }

    fn parse_token_response(
        &self,
        target: AuthTarget,
        response: &HttpResponse,
        previous_refresh_token: Option<&str>,
    ) -> Result<IssuedTokens> {
        let body: TokenResponse = response.json().map_err(|e| AuthError::TransientNetwork {
            target: target.to_string(),
            message: format!("Failed to parse token response: {e}"),
        })?;

        if body.access_token.is_empty() {
            return Err(AuthError::TransientNetwork {
                target: target.to_string(),
                message: "Token response carried an empty access token".to_string(),
            });
        }

        let refresh_token = body
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_string));

        Ok(IssuedTokens {
            access_token: body.access_token,
            refresh_token,
            expires_in_secs: body.expires_in,
            issued_at_ms: self.clock.unix_timestamp_millis(),
        })
    }
}

fn form_request(config: &OAuthConfig, url: &str, params: &[(&str, &str)]) -> Result<HttpRequest> {
    HttpRequest::new(HttpMethod::Post, url)
        .header("Accept", "application/json")
        .form(params)
        .map_err(|e| {
            AuthError::Configuration(format!(
                "{} token request could not be encoded: {e}",
                config.target
            ))
        })
}

fn transport_error(target: AuthTarget, error: BridgeError) -> AuthError {
    AuthError::TransientNetwork {
        target: target.to_string(),
        message: error.to_string(),
    }
}

/// Map a non-2xx response: 4xx other than 408/429 is a rejected grant,
/// everything else is transient.
fn status_error(target: AuthTarget, response: &HttpResponse, operation: &str) -> AuthError {
    let message = format!(
        "{operation} returned {}: {}",
        response.status,
        extract_error_message(&response.body)
    );
    warn!(status = response.status, "{operation} failed");

    if response.is_client_error() && !response.is_retryable() {
        AuthError::InvalidGrant {
            target: target.to_string(),
            message,
        }
    } else {
        AuthError::TransientNetwork {
            target: target.to_string(),
            message,
        }
    }
}

/// Human-readable reason from an error body: RFC 6749 `error_description`
/// or `error` when the body is JSON, else the start of the raw text.
pub fn extract_error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<serde_json::Value>,
        error_description: Option<String>,
        message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(description) = parsed.error_description.filter(|d| !d.is_empty()) {
            return description;
        }
        match parsed.error {
            Some(serde_json::Value::String(code)) if !code.is_empty() => return code,
            Some(serde_json::Value::Object(inner)) => {
                if let Some(serde_json::Value::String(text)) = inner.get("message") {
                    return text.clone();
                }
            }
            _ => {}
        }
        if let Some(message) = parsed.message.filter(|m| !m.is_empty()) {
            return message;
        }
    }

    let text = String::from_utf8_lossy(body);
    let snippet: String = text.trim().chars().take(ERROR_SNIPPET_CHARS).collect();
    if snippet.is_empty() {
        "empty response body".to_string()
    } else {
        snippet
    }
}

/// Token response from the OAuth provider.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[allow(dead_code)]
    token_type: Option<String>,
    #[allow(dead_code)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600 // Default to 1 hour if not specified
}
