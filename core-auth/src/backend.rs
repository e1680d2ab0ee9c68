//! # Backend Configuration Model
//!
//! One record type per storage backend, unified under [`BackendConfig`].
//!
//! The persisted JSON shape of every record (field names and the `kind`
//! tag) is read by other tooling and must stay stable.
//!
//! ## Auth shapes
//!
//! - OAuth token group ([`OAuthCredentials`]): Google Drive, Box, Yandex Disk, Koofr
//! - OAuth with client registration in the record: OneDrive (full)
//! - Static access token: pCloud
//! - Static container SAS URL: Azure Blob Storage
//!
//! Static-key records have no refresh token field at all.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroU32;

use crate::error::{AuthError, Result};
use crate::oauth::IssuedTokens;
use crate::path::RemoteBaseDir;
use crate::types::{BackendKind, TokenState};

pub const GOOGLEDRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
pub const KOOFR_DEFAULT_API: &str = "https://app.koofr.net";
pub const DEFAULT_PARTS_CONCURRENCY: u32 = 5;

/// Token group shared by the PKCE backends that store times in milliseconds.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub access_token_expires_in_ms: i64,
    #[serde(default)]
    pub access_token_expires_at_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_should_be_deleted_at_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_base_dir: Option<RemoteBaseDir>,
}

impl OAuthCredentials {
    fn token_state(&self) -> TokenState {
        TokenState {
            access_token: self.access_token.clone(),
            refresh_token: non_empty(&self.refresh_token),
            expires_at_ms: self.access_token_expires_at_time_ms,
        }
    }

    fn apply(&mut self, tokens: &IssuedTokens) {
        let expires_in_ms = tokens.expires_in_ms();
        *self = OAuthCredentials {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens
                .refresh_token
                .clone()
                .unwrap_or_else(|| std::mem::take(&mut self.refresh_token)),
            access_token_expires_in_ms: expires_in_ms,
            access_token_expires_at_time_ms: tokens.issued_at_ms.saturating_add(expires_in_ms),
            credentials_should_be_deleted_at_time_ms: self.credentials_should_be_deleted_at_time_ms,
            remote_base_dir: self.remote_base_dir.take(),
        };
    }

    fn has_credentials(&self) -> bool {
        !self.access_token.is_empty() || !self.refresh_token.is_empty()
    }

    fn clear(&mut self) {
        *self = OAuthCredentials {
            remote_base_dir: self.remote_base_dir.take(),
            ..OAuthCredentials::default()
        };
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("access_token", &redacted(&self.access_token))
            .field("refresh_token", &redacted(&self.refresh_token))
            .field(
                "access_token_expires_at_time_ms",
                &self.access_token_expires_at_time_ms,
            )
            .field(
                "credentials_should_be_deleted_at_time_ms",
                &self.credentials_should_be_deleted_at_time_ms,
            )
            .field("remote_base_dir", &self.remote_base_dir)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleDriveConfig {
    #[serde(flatten)]
    pub credentials: OAuthCredentials,
    #[serde(default = "default_googledrive_scope")]
    pub scope: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            credentials: OAuthCredentials::default(),
            scope: default_googledrive_scope(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoxConfig {
    #[serde(flatten)]
    pub credentials: OAuthCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct YandexDiskConfig {
    #[serde(flatten)]
    pub credentials: OAuthCredentials,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KoofrConfig {
    #[serde(flatten)]
    pub credentials: OAuthCredentials,
    #[serde(default)]
    pub scope: String,
    #[serde(default = "default_koofr_api")]
    pub api: String,
    #[serde(default, rename = "mountID")]
    pub mount_id: String,
}

impl Default for KoofrConfig {
    fn default() -> Self {
        Self {
            credentials: OAuthCredentials::default(),
            scope: String::new(),
            api: default_koofr_api(),
            mount_id: String::new(),
        }
    }
}

/// What to do with zero-byte files. Stored for compatibility only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyFilePolicy {
    #[default]
    Skip,
    Error,
}

/// OneDrive with full drive access.
///
/// Unlike the other PKCE backends the client registration (`clientID`,
/// `authority`) lives in the record, and expiry uses `expiresIn` in seconds
/// with `expiresAt` in epoch milliseconds.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnedriveFullConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, rename = "clientID")]
    pub client_id: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub access_token_expires_in_seconds: i64,
    #[serde(default)]
    pub access_token_expires_at_time: i64,
    #[serde(default)]
    pub delta_link: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_should_be_deleted_at_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_base_dir: Option<RemoteBaseDir>,
    #[serde(default)]
    pub empty_file: EmptyFilePolicy,
}

impl fmt::Debug for OnedriveFullConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnedriveFullConfig")
            .field("access_token", &redacted(&self.access_token))
            .field("client_id", &self.client_id)
            .field("authority", &self.authority)
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("access_token_expires_at_time", &self.access_token_expires_at_time)
            .field("username", &self.username)
            .field(
                "credentials_should_be_deleted_at_time",
                &self.credentials_should_be_deleted_at_time,
            )
            .field("remote_base_dir", &self.remote_base_dir)
            .field("empty_file", &self.empty_file)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PCloudHostname {
    #[default]
    #[serde(rename = "api.pcloud.com")]
    Us,
    #[serde(rename = "eapi.pcloud.com")]
    Eu,
}

/// pCloud data region, persisted as the integer `1` (US) or `2` (EU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PCloudLocation {
    #[default]
    Us,
    Eu,
}

impl TryFrom<u8> for PCloudLocation {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PCloudLocation::Us),
            2 => Ok(PCloudLocation::Eu),
            other => Err(format!("invalid pCloud locationid {other}, expected 1 or 2")),
        }
    }
}

impl From<PCloudLocation> for u8 {
    fn from(location: PCloudLocation) -> Self {
        match location {
            PCloudLocation::Us => 1,
            PCloudLocation::Eu => 2,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PCloudConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub hostname: PCloudHostname,
    #[serde(default, rename = "locationid")]
    pub location_id: PCloudLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_base_dir: Option<RemoteBaseDir>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_should_be_deleted_at_time_ms: Option<i64>,
    /// Deprecated, kept so older documents round-trip.
    #[serde(default)]
    pub empty_file: EmptyFilePolicy,
}

impl fmt::Debug for PCloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PCloudConfig")
            .field("access_token", &redacted(&self.access_token))
            .field("hostname", &self.hostname)
            .field("location_id", &self.location_id)
            .field("remote_base_dir", &self.remote_base_dir)
            .field(
                "credentials_should_be_deleted_at_time_ms",
                &self.credentials_should_be_deleted_at_time_ms,
            )
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureBlobStorageConfig {
    #[serde(default)]
    pub container_sas_url: String,
    #[serde(default)]
    pub container_name: String,
    #[serde(default)]
    pub remote_prefix: String,
    #[serde(default)]
    pub generate_folder_object: bool,
    #[serde(default = "default_parts_concurrency")]
    pub parts_concurrency: NonZeroU32,
}

impl Default for AzureBlobStorageConfig {
    fn default() -> Self {
        Self {
            container_sas_url: String::new(),
            container_name: String::new(),
            remote_prefix: String::new(),
            generate_folder_object: false,
            parts_concurrency: default_parts_concurrency(),
        }
    }
}

impl fmt::Debug for AzureBlobStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStorageConfig")
            .field("container_sas_url", &redacted(&self.container_sas_url))
            .field("container_name", &self.container_name)
            .field("remote_prefix", &self.remote_prefix)
            .field("generate_folder_object", &self.generate_folder_object)
            .field("parts_concurrency", &self.parts_concurrency)
            .finish()
    }
}

/// Configuration of one backend, tagged by `kind`.
///
/// # Examples
///
/// ```
/// use core_auth::{BackendConfig, BackendKind};
///
/// let config = BackendConfig::default_for(BackendKind::Box);
/// let json = serde_json::to_value(&config).unwrap();
/// assert_eq!(json["kind"], "box");
/// assert!(!config.has_credentials());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BackendConfig {
    #[serde(rename = "onedrivefull")]
    OnedriveFull(OnedriveFullConfig),
    #[serde(rename = "googledrive")]
    GoogleDrive(GoogleDriveConfig),
    #[serde(rename = "box")]
    Box(BoxConfig),
    #[serde(rename = "pcloud")]
    PCloud(PCloudConfig),
    #[serde(rename = "yandexdisk")]
    YandexDisk(YandexDiskConfig),
    #[serde(rename = "koofr")]
    Koofr(KoofrConfig),
    #[serde(rename = "azureblobstorage")]
    AzureBlobStorage(AzureBlobStorageConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::OnedriveFull(_) => BackendKind::OnedriveFull,
            BackendConfig::GoogleDrive(_) => BackendKind::GoogleDrive,
            BackendConfig::Box(_) => BackendKind::Box,
            BackendConfig::PCloud(_) => BackendKind::PCloud,
            BackendConfig::YandexDisk(_) => BackendKind::YandexDisk,
            BackendConfig::Koofr(_) => BackendKind::Koofr,
            BackendConfig::AzureBlobStorage(_) => BackendKind::AzureBlobStorage,
        }
    }

    /// Fresh zero-value record. Every call returns a new value.
    pub fn default_for(kind: BackendKind) -> Self {
        match kind {
            BackendKind::OnedriveFull => BackendConfig::OnedriveFull(Default::default()),
            BackendKind::GoogleDrive => BackendConfig::GoogleDrive(Default::default()),
            BackendKind::Box => BackendConfig::Box(Default::default()),
            BackendKind::PCloud => BackendConfig::PCloud(Default::default()),
            BackendKind::YandexDisk => BackendConfig::YandexDisk(Default::default()),
            BackendKind::Koofr => BackendConfig::Koofr(Default::default()),
            BackendKind::AzureBlobStorage => BackendConfig::AzureBlobStorage(Default::default()),
        }
    }

    pub fn is_oauth(&self) -> bool {
        self.kind().is_oauth()
    }

    fn oauth_credentials(&self) -> Option<&OAuthCredentials> {
        match self {
            BackendConfig::GoogleDrive(c) => Some(&c.credentials),
            BackendConfig::Box(c) => Some(&c.credentials),
            BackendConfig::YandexDisk(c) => Some(&c.credentials),
            BackendConfig::Koofr(c) => Some(&c.credentials),
            _ => None,
        }
    }

    fn oauth_credentials_mut(&mut self) -> Option<&mut OAuthCredentials> {
        match self {
            BackendConfig::GoogleDrive(c) => Some(&mut c.credentials),
            BackendConfig::Box(c) => Some(&mut c.credentials),
            BackendConfig::YandexDisk(c) => Some(&mut c.credentials),
            BackendConfig::Koofr(c) => Some(&mut c.credentials),
            _ => None,
        }
    }

    /// Stored OAuth token tuple, `None` for static-key backends.
    pub fn token_state(&self) -> Option<TokenState> {
        if let Some(credentials) = self.oauth_credentials() {
            return Some(credentials.token_state());
        }
        match self {
            BackendConfig::OnedriveFull(c) => Some(TokenState {
                access_token: c.access_token.clone(),
                refresh_token: non_empty(&c.refresh_token),
                expires_at_ms: c.access_token_expires_at_time,
            }),
            _ => None,
        }
    }

    /// Write a freshly issued token tuple in one assignment.
    ///
    /// `expiresAt = issuedAt + expiresIn`. A missing refresh token in
    /// `tokens` keeps the stored one.
    pub fn apply_tokens(&mut self, tokens: &IssuedTokens) -> Result<()> {
        let kind = self.kind();
        if let Some(credentials) = self.oauth_credentials_mut() {
            credentials.apply(tokens);
            return Ok(());
        }
        match self {
            BackendConfig::OnedriveFull(c) => {
                let refresh_token = tokens
                    .refresh_token
                    .clone()
                    .unwrap_or_else(|| std::mem::take(&mut c.refresh_token));
                *c = OnedriveFullConfig {
                    access_token: tokens.access_token.clone(),
                    refresh_token,
                    access_token_expires_in_seconds: tokens.expires_in_secs,
                    access_token_expires_at_time: tokens.expires_at_ms(),
                    ..std::mem::take(c)
                };
                Ok(())
            }
            _ => Err(AuthError::Configuration(format!(
                "{kind} uses a static key and cannot store OAuth tokens"
            ))),
        }
    }

    pub fn has_credentials(&self) -> bool {
        if let Some(credentials) = self.oauth_credentials() {
            return credentials.has_credentials();
        }
        match self {
            BackendConfig::OnedriveFull(c) => {
                !c.access_token.is_empty() || !c.refresh_token.is_empty()
            }
            BackendConfig::PCloud(c) => !c.access_token.is_empty(),
            BackendConfig::AzureBlobStorage(c) => !c.container_sas_url.is_empty(),
            _ => false,
        }
    }

    /// Blank every secret and account-specific field plus the deletion
    /// schedule. Keeps the remote base directory and, for OneDrive, the
    /// client registration.
    pub fn clear_credentials(&mut self) {
        if let Some(credentials) = self.oauth_credentials_mut() {
            credentials.clear();
        }
        match self {
            BackendConfig::Koofr(c) => c.mount_id.clear(),
            BackendConfig::OnedriveFull(c) => {
                *c = OnedriveFullConfig {
                    client_id: std::mem::take(&mut c.client_id),
                    authority: std::mem::take(&mut c.authority),
                    remote_base_dir: c.remote_base_dir.take(),
                    empty_file: c.empty_file,
                    ..OnedriveFullConfig::default()
                };
            }
            BackendConfig::PCloud(c) => {
                c.access_token.clear();
                c.credentials_should_be_deleted_at_time_ms = None;
            }
            BackendConfig::AzureBlobStorage(c) => c.container_sas_url.clear(),
            _ => {}
        }
    }

    pub fn remote_base_dir(&self) -> Option<&RemoteBaseDir> {
        if let Some(credentials) = self.oauth_credentials() {
            return credentials.remote_base_dir.as_ref();
        }
        match self {
            BackendConfig::OnedriveFull(c) => c.remote_base_dir.as_ref(),
            BackendConfig::PCloud(c) => c.remote_base_dir.as_ref(),
            _ => None,
        }
    }

    /// Normalize and store a user-entered remote base directory. An input
    /// that normalizes to nothing unsets it.
    pub fn set_remote_base_dir(&mut self, raw: &str) -> Result<()> {
        let dir = RemoteBaseDir::parse(raw);
        let kind = self.kind();
        if let Some(credentials) = self.oauth_credentials_mut() {
            credentials.remote_base_dir = dir;
            return Ok(());
        }
        match self {
            BackendConfig::OnedriveFull(c) => c.remote_base_dir = dir,
            BackendConfig::PCloud(c) => c.remote_base_dir = dir,
            _ => {
                return Err(AuthError::Configuration(format!(
                    "{kind} does not support a remote base directory"
                )))
            }
        }
        Ok(())
    }

    /// Epoch milliseconds after which the credentials must be wiped.
    pub fn deletion_deadline(&self) -> Option<i64> {
        if let Some(credentials) = self.oauth_credentials() {
            return credentials.credentials_should_be_deleted_at_time_ms;
        }
        match self {
            BackendConfig::OnedriveFull(c) => c.credentials_should_be_deleted_at_time,
            BackendConfig::PCloud(c) => c.credentials_should_be_deleted_at_time_ms,
            _ => None,
        }
    }

    /// Set the deletion deadline. Returns `false` for records without a
    /// deadline field.
    pub fn schedule_deletion(&mut self, at_ms: i64) -> bool {
        self.set_deadline(Some(at_ms))
    }

    pub fn clear_deletion_schedule(&mut self) {
        self.set_deadline(None);
    }

    fn set_deadline(&mut self, deadline: Option<i64>) -> bool {
        if let Some(credentials) = self.oauth_credentials_mut() {
            credentials.credentials_should_be_deleted_at_time_ms = deadline;
            return true;
        }
        match self {
            BackendConfig::OnedriveFull(c) => c.credentials_should_be_deleted_at_time = deadline,
            BackendConfig::PCloud(c) => c.credentials_should_be_deleted_at_time_ms = deadline,
            _ => return false,
        }
        true
    }

    /// Wipe credentials when the deletion deadline has been reached.
    pub fn wipe_if_due(&mut self, now_ms: i64) -> bool {
        match self.deletion_deadline() {
            Some(deadline) if deadline <= now_ms => {
                self.clear_credentials();
                self.clear_deletion_schedule();
                true
            }
            _ => false,
        }
    }
}

/// Record types that sit in a fixed slot of the settings document.
///
/// Slots are serialized with their `kind` tag so the stored document keeps
/// the self-describing shape.
pub trait BackendRecord: Serialize + Into<BackendConfig> + Default {
    const KIND: BackendKind;
}

macro_rules! backend_record {
    ($record:ty, $variant:ident) => {
        impl BackendRecord for $record {
            const KIND: BackendKind = BackendKind::$variant;
        }

        impl From<$record> for BackendConfig {
            fn from(record: $record) -> Self {
                BackendConfig::$variant(record)
            }
        }
    };
}

backend_record!(OnedriveFullConfig, OnedriveFull);
backend_record!(GoogleDriveConfig, GoogleDrive);
backend_record!(BoxConfig, Box);
backend_record!(PCloudConfig, PCloud);
backend_record!(YandexDiskConfig, YandexDisk);
backend_record!(KoofrConfig, Koofr);
backend_record!(AzureBlobStorageConfig, AzureBlobStorage);

/// `#[serde(with = ...)]` adapter writing a record together with its `kind`.
pub(crate) mod kind_tagged {
    use super::*;

    #[derive(Serialize)]
    struct Tagged<'a, T> {
        kind: &'static str,
        #[serde(flatten)]
        record: &'a T,
    }

    pub fn serialize<T, S>(record: &T, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        T: BackendRecord,
        S: Serializer,
    {
        Tagged {
            kind: T::KIND.as_str(),
            record,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> std::result::Result<T, D::Error>
    where
        T: BackendRecord + Deserialize<'de>,
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}

fn default_googledrive_scope() -> String {
    GOOGLEDRIVE_SCOPE.to_string()
}

fn default_koofr_api() -> String {
    KOOFR_DEFAULT_API.to_string()
}

fn default_parts_concurrency() -> NonZeroU32 {
    NonZeroU32::MIN.saturating_add(DEFAULT_PARTS_CONCURRENCY - 1)
}
