//! # Credential Lifecycle Core
//!
//! Credentials and entitlements for the cloud-sync backends.
//!
//! ## Overview
//!
//! This crate owns everything between "the user clicked Connect" and "the
//! sync engine has a usable access token":
//!
//! - OAuth 2.0 authorization code flow with PKCE (S256) and CSRF `state`
//! - Per-backend configuration records persisted in the plugin settings
//! - Token refresh serialized per target
//! - Pro entitlements gating each backend, with delayed credential deletion
//!   once a feature lapses
//! - Remote base directory normalization
//!
//! Lifecycle changes are published as `CoreEvent::Auth` and
//! `CoreEvent::Entitlement` on the shared event bus.
//!
//! ## Example
//!
//! ```
//! use core_auth::{BackendConfig, BackendKind, FeatureTag};
//! use core_auth::path::normalize_remote_base_dir;
//!
//! let config = BackendConfig::default_for(BackendKind::Koofr);
//! assert!(config.is_oauth());
//! assert_eq!(BackendKind::Koofr.feature(), FeatureTag::Koofr);
//! assert_eq!(normalize_remote_base_dir("/Vault//Notes/"), "Vault/Notes");
//! ```

pub mod backend;
pub mod callback;
pub mod entitlement;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod path;
pub mod providers;
pub mod settings;
pub mod types;

pub use backend::{
    AzureBlobStorageConfig, BackendConfig, BackendRecord, BoxConfig, EmptyFilePolicy,
    GoogleDriveConfig, KoofrConfig, OAuthCredentials, OnedriveFullConfig, PCloudConfig,
    PCloudHostname, PCloudLocation, YandexDiskConfig,
};
pub use callback::{CallbackParams, CallbackRegistry};
pub use entitlement::{is_feature_active, FeatureInfo, ProAccount};
pub use error::{AuthError, CallbackError, Result};
pub use manager::CredentialManager;
pub use oauth::{EntropySource, IssuedTokens, OAuthConfig, OAuthFlowManager, OsEntropy, PkceVerifier};
pub use path::{normalize_remote_base_dir, RemoteBaseDir};
pub use providers::{ClientCredentials, ClientRegistrations};
pub use settings::{PluginSettings, SettingsRepository, SETTINGS_KEY};
pub use types::{AuthState, AuthTarget, BackendKind, FeatureTag, TokenState};
