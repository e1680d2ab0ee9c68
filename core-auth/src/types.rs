use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage backends a vault can sync with.
///
/// The serialized form is the `kind` discriminator used in the persisted
/// settings document.
///
/// # Examples
///
/// ```
/// use core_auth::BackendKind;
///
/// let kind = BackendKind::GoogleDrive;
/// assert_eq!(kind.as_str(), "googledrive");
/// assert_eq!(kind.callback_id(), "cloud-sync-cb-googledrive");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "onedrivefull")]
    OnedriveFull,
    #[serde(rename = "googledrive")]
    GoogleDrive,
    #[serde(rename = "box")]
    Box,
    #[serde(rename = "pcloud")]
    PCloud,
    #[serde(rename = "yandexdisk")]
    YandexDisk,
    #[serde(rename = "koofr")]
    Koofr,
    #[serde(rename = "azureblobstorage")]
    AzureBlobStorage,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::OnedriveFull,
        BackendKind::GoogleDrive,
        BackendKind::Box,
        BackendKind::PCloud,
        BackendKind::YandexDisk,
        BackendKind::Koofr,
        BackendKind::AzureBlobStorage,
    ];

    /// Wire tag, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OnedriveFull => "onedrivefull",
            BackendKind::GoogleDrive => "googledrive",
            BackendKind::Box => "box",
            BackendKind::PCloud => "pcloud",
            BackendKind::YandexDisk => "yandexdisk",
            BackendKind::Koofr => "koofr",
            BackendKind::AzureBlobStorage => "azureblobstorage",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::OnedriveFull => "OneDrive (Full)",
            BackendKind::GoogleDrive => "Google Drive",
            BackendKind::Box => "Box",
            BackendKind::PCloud => "pCloud",
            BackendKind::YandexDisk => "Yandex Disk",
            BackendKind::Koofr => "Koofr",
            BackendKind::AzureBlobStorage => "Azure Blob Storage",
        }
    }

    /// Parse a wire tag.
    ///
    /// ```
    /// use core_auth::BackendKind;
    ///
    /// assert_eq!(BackendKind::parse("koofr"), Some(BackendKind::Koofr));
    /// assert_eq!(BackendKind::parse("dropbox"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Pro feature that has to be active before the backend is usable.
    pub fn feature(&self) -> FeatureTag {
        match self {
            BackendKind::OnedriveFull => FeatureTag::OnedriveFull,
            BackendKind::GoogleDrive => FeatureTag::GoogleDrive,
            BackendKind::Box => FeatureTag::Box,
            BackendKind::PCloud => FeatureTag::PCloud,
            BackendKind::YandexDisk => FeatureTag::YandexDisk,
            BackendKind::Koofr => FeatureTag::Koofr,
            BackendKind::AzureBlobStorage => FeatureTag::AzureBlobStorage,
        }
    }

    /// Whether the backend authenticates through the OAuth2 PKCE flow.
    pub fn is_oauth(&self) -> bool {
        !matches!(self, BackendKind::PCloud | BackendKind::AzureBlobStorage)
    }

    pub fn callback_id(&self) -> String {
        format!("cloud-sync-cb-{}", self.as_str())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pro feature tags as issued by the licensing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureTag {
    #[serde(rename = "feature-smart_conflict")]
    SmartConflict,
    #[serde(rename = "feature-onedrive_full")]
    OnedriveFull,
    #[serde(rename = "feature-google_drive")]
    GoogleDrive,
    #[serde(rename = "feature-box")]
    Box,
    #[serde(rename = "feature-pcloud")]
    PCloud,
    #[serde(rename = "feature-yandex_disk")]
    YandexDisk,
    #[serde(rename = "feature-koofr")]
    Koofr,
    #[serde(rename = "feature-azure_blob_storage")]
    AzureBlobStorage,
}

impl FeatureTag {
    pub const ALL: [FeatureTag; 8] = [
        FeatureTag::SmartConflict,
        FeatureTag::OnedriveFull,
        FeatureTag::GoogleDrive,
        FeatureTag::Box,
        FeatureTag::PCloud,
        FeatureTag::YandexDisk,
        FeatureTag::Koofr,
        FeatureTag::AzureBlobStorage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureTag::SmartConflict => "feature-smart_conflict",
            FeatureTag::OnedriveFull => "feature-onedrive_full",
            FeatureTag::GoogleDrive => "feature-google_drive",
            FeatureTag::Box => "feature-box",
            FeatureTag::PCloud => "feature-pcloud",
            FeatureTag::YandexDisk => "feature-yandex_disk",
            FeatureTag::Koofr => "feature-koofr",
            FeatureTag::AzureBlobStorage => "feature-azure_blob_storage",
        }
    }

    /// Backend gated by this feature, if any.
    pub fn gated_backend(&self) -> Option<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.feature() == *self)
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that owns a credential set: a storage backend or the Pro account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTarget {
    Backend(BackendKind),
    Pro,
}

impl AuthTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthTarget::Backend(kind) => kind.as_str(),
            AuthTarget::Pro => "pro",
        }
    }

    pub fn callback_id(&self) -> String {
        format!("cloud-sync-cb-{}", self.as_str())
    }

    /// Feature gating this target. The Pro account itself is never gated.
    pub fn feature(&self) -> Option<FeatureTag> {
        match self {
            AuthTarget::Backend(kind) => Some(kind.feature()),
            AuthTarget::Pro => None,
        }
    }
}

impl From<BackendKind> for AuthTarget {
    fn from(kind: BackendKind) -> Self {
        AuthTarget::Backend(kind)
    }
}

impl fmt::Display for AuthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    /// No credentials stored
    Unauthenticated,
    /// Authorization URL handed out, waiting for the callback
    AwaitingUserAuthorization,
    /// Authorization code is being exchanged
    ExchangingCode,
    /// Usable credentials are stored
    Authenticated,
    /// Stored access token is stale and will be refreshed on next use
    RefreshPending,
    /// Credentials were reset by an explicit revoke
    Revoked,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::RefreshPending)
    }
}

/// Snapshot of a stored OAuth token tuple.
///
/// `Debug` never prints the tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: i64,
}

impl TokenState {
    /// A token is fresh while `now < expires_at - margin`.
    ///
    /// ```
    /// use core_auth::TokenState;
    ///
    /// let token = TokenState {
    ///     access_token: "at".into(),
    ///     refresh_token: None,
    ///     expires_at_ms: 10_000,
    /// };
    /// assert!(token.is_fresh(4_999, 5_000));
    /// assert!(!token.is_fresh(5_000, 5_000));
    /// ```
    pub fn is_fresh(&self, now_ms: i64, margin_ms: i64) -> bool {
        !self.access_token.is_empty() && now_ms < self.expires_at_ms.saturating_sub(margin_ms)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}
