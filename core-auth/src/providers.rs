//! Per-target OAuth endpoints and client registrations.
//!
//! Client ids and secrets are build/deploy-time values. They are read from
//! the environment by [`ClientRegistrations::from_env`]; OneDrive (full)
//! additionally takes its client id and authority from the stored record.

use std::fmt;

use crate::backend::{BackendConfig, OnedriveFullConfig};
use crate::error::{AuthError, Result};
use crate::oauth::OAuthConfig;
use crate::settings::PluginSettings;
use crate::types::{AuthTarget, BackendKind};

pub const DEFAULT_REDIRECT_SCHEME: &str = "obsidian";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const BOX_AUTH_URL: &str = "https://account.box.com/api/oauth2/authorize";
const BOX_TOKEN_URL: &str = "https://api.box.com/oauth2/token";
const BOX_REVOKE_URL: &str = "https://api.box.com/oauth2/revoke";
const YANDEX_AUTH_URL: &str = "https://oauth.yandex.com/authorize";
const YANDEX_TOKEN_URL: &str = "https://oauth.yandex.com/token";
const ONEDRIVE_SCOPES: [&str; 3] = ["User.Read", "Files.ReadWrite.All", "offline_access"];

/// A registered OAuth client.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Client registrations for every OAuth target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRegistrations {
    pub googledrive: ClientCredentials,
    pub box_: ClientCredentials,
    pub yandexdisk: ClientCredentials,
    pub koofr: ClientCredentials,
    /// Defaults written into fresh OneDrive records
    pub onedrive_client_id: String,
    pub onedrive_authority: String,
    pub pro_client_id: String,
    /// Base URL of the licensing website, without trailing slash
    pub pro_website: String,
    /// URL scheme the host registers for callbacks
    pub redirect_scheme: String,
}

impl Default for ClientRegistrations {
    fn default() -> Self {
        Self {
            googledrive: ClientCredentials::default(),
            box_: ClientCredentials::default(),
            yandexdisk: ClientCredentials::default(),
            koofr: ClientCredentials::default(),
            onedrive_client_id: String::new(),
            onedrive_authority: String::new(),
            pro_client_id: String::new(),
            pro_website: String::new(),
            redirect_scheme: DEFAULT_REDIRECT_SCHEME.to_string(),
        }
    }
}

impl ClientRegistrations {
    /// Read registrations from the process environment.
    ///
    /// Missing variables leave the field blank; the matching target then
    /// fails with a configuration error when it is used.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let client = |prefix: &str| ClientCredentials {
            client_id: value(&format!("{prefix}_CLIENT_ID")).unwrap_or_default(),
            client_secret: value(&format!("{prefix}_CLIENT_SECRET")),
        };

        Self {
            googledrive: client("GOOGLEDRIVE"),
            box_: client("BOX"),
            yandexdisk: client("YANDEXDISK"),
            koofr: client("KOOFR"),
            onedrive_client_id: value("ONEDRIVE_CLIENT_ID").unwrap_or_default(),
            onedrive_authority: value("ONEDRIVE_AUTHORITY").unwrap_or_default(),
            pro_client_id: value("CLOUDSYNC_CLIENT_ID").unwrap_or_default(),
            pro_website: value("CLOUDSYNC_WEBSITE")
                .map(|site| site.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            redirect_scheme: value("CLOUDSYNC_REDIRECT_SCHEME")
                .unwrap_or_else(|| DEFAULT_REDIRECT_SCHEME.to_string()),
        }
    }

    pub fn redirect_uri(&self, target: AuthTarget) -> String {
        format!("{}://{}", self.redirect_scheme, target.callback_id())
    }

    /// OAuth client configuration for `target`.
    ///
    /// # Errors
    ///
    /// `AuthError::Configuration` for static-key backends, for a OneDrive
    /// record whose client id or authority is blank and not registered, and
    /// for a Pro target without a website.
    pub fn oauth_config(&self, target: AuthTarget, settings: &PluginSettings) -> Result<OAuthConfig> {
        let redirect_uri = self.redirect_uri(target);
        let base = |client: &ClientCredentials, auth_url: String, token_url: String| OAuthConfig {
            target,
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            redirect_uri: redirect_uri.clone(),
            scopes: Vec::new(),
            auth_url,
            token_url,
            revoke_url: None,
            extra_auth_params: Vec::new(),
        };

        let config = match target {
            AuthTarget::Pro => {
                if self.pro_website.is_empty() {
                    return Err(AuthError::Configuration(
                        "CLOUDSYNC_WEBSITE is not configured".to_string(),
                    ));
                }
                let client = ClientCredentials::new(self.pro_client_id.clone(), None);
                base(
                    &client,
                    format!("{}/oauth2/authorize", self.pro_website),
                    format!("{}/api/v1/oauth2/token", self.pro_website),
                )
            }
            AuthTarget::Backend(BackendKind::GoogleDrive) => OAuthConfig {
                scopes: vec![settings.googledrive.scope.clone()],
                revoke_url: Some(GOOGLE_REVOKE_URL.to_string()),
                extra_auth_params: vec![
                    ("access_type".to_string(), "offline".to_string()),
                    ("prompt".to_string(), "consent".to_string()),
                ],
                ..base(
                    &self.googledrive,
                    GOOGLE_AUTH_URL.to_string(),
                    GOOGLE_TOKEN_URL.to_string(),
                )
            },
            AuthTarget::Backend(BackendKind::Box) => OAuthConfig {
                revoke_url: Some(BOX_REVOKE_URL.to_string()),
                ..base(&self.box_, BOX_AUTH_URL.to_string(), BOX_TOKEN_URL.to_string())
            },
            AuthTarget::Backend(BackendKind::YandexDisk) => OAuthConfig {
                scopes: non_empty_scopes(&settings.yandexdisk.scope),
                ..base(
                    &self.yandexdisk,
                    YANDEX_AUTH_URL.to_string(),
                    YANDEX_TOKEN_URL.to_string(),
                )
            },
            AuthTarget::Backend(BackendKind::Koofr) => {
                let api = settings.koofr.api.trim().trim_end_matches('/');
                OAuthConfig {
                    scopes: non_empty_scopes(&settings.koofr.scope),
                    ..base(
                        &self.koofr,
                        format!("{api}/oauth2/auth"),
                        format!("{api}/oauth2/token"),
                    )
                }
            }
            AuthTarget::Backend(BackendKind::OnedriveFull) => {
                let record = &settings.onedrivefull;
                let client_id = non_blank(&record.client_id, &self.onedrive_client_id);
                let authority = non_blank(&record.authority, &self.onedrive_authority)
                    .trim_end_matches('/');
                if client_id.is_empty() || authority.is_empty() {
                    return Err(AuthError::Configuration(
                        "OneDrive (full) is missing clientID and/or authority".to_string(),
                    ));
                }
                OAuthConfig {
                    scopes: ONEDRIVE_SCOPES.iter().map(|s| s.to_string()).collect(),
                    ..base(
                        &ClientCredentials::new(client_id, None),
                        format!("{authority}/oauth2/v2.0/authorize"),
                        format!("{authority}/oauth2/v2.0/token"),
                    )
                }
            }
            AuthTarget::Backend(kind @ (BackendKind::PCloud | BackendKind::AzureBlobStorage)) => {
                return Err(AuthError::Configuration(format!(
                    "{kind} uses a static key, not OAuth"
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Licensing endpoint returning the Pro entitlement list.
    pub fn entitlements_url(&self) -> Result<String> {
        if self.pro_website.is_empty() {
            return Err(AuthError::Configuration(
                "CLOUDSYNC_WEBSITE is not configured".to_string(),
            ));
        }
        Ok(format!("{}/api/v1/pro/features", self.pro_website))
    }

    /// Compiled-in zero-value record for `kind`, freshly allocated on every
    /// call. OneDrive records start with the registered client defaults.
    pub fn template_for(&self, kind: BackendKind) -> BackendConfig {
        match kind {
            BackendKind::OnedriveFull => BackendConfig::OnedriveFull(OnedriveFullConfig {
                client_id: self.onedrive_client_id.clone(),
                authority: self.onedrive_authority.clone(),
                ..OnedriveFullConfig::default()
            }),
            other => BackendConfig::default_for(other),
        }
    }

    /// Whether `config` holds nothing beyond what a fresh vault starts with:
    /// either the template or the bare zero-value record.
    pub fn is_template(&self, config: &BackendConfig) -> bool {
        let kind = config.kind();
        *config == self.template_for(kind) || *config == BackendConfig::default_for(kind)
    }
}

/// `stored` trimmed, or the registered value when the stored one is blank.
fn non_blank<'a>(stored: &'a str, registered: &'a str) -> &'a str {
    match stored.trim() {
        "" => registered.trim(),
        value => value,
    }
}

fn non_empty_scopes(scope: &str) -> Vec<String> {
    let scope = scope.trim();
    if scope.is_empty() {
        Vec::new()
    } else {
        vec![scope.to_string()]
    }
}
