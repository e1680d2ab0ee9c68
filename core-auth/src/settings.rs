//! Persisted plugin settings and their repository.
//!
//! The whole document lives as one JSON string under [`SETTINGS_KEY`] in the
//! host's [`SettingsStore`]. Keys this crate does not own are carried
//! through untouched.

use bridge_traits::storage::SettingsStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::backend::{
    kind_tagged, AzureBlobStorageConfig, BackendConfig, BoxConfig, GoogleDriveConfig,
    KoofrConfig, OnedriveFullConfig, PCloudConfig, YandexDiskConfig,
};
use crate::entitlement::ProAccount;
use crate::error::{AuthError, Result};
use crate::types::{AuthTarget, BackendKind};

pub const SETTINGS_KEY: &str = "plugin_settings";

/// The persisted settings aggregate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSettings {
    /// Selected backend. May name services outside this crate.
    #[serde(default)]
    pub service_type: String,
    #[serde(default, with = "kind_tagged")]
    pub onedrivefull: OnedriveFullConfig,
    #[serde(default, with = "kind_tagged")]
    pub googledrive: GoogleDriveConfig,
    #[serde(default, with = "kind_tagged", rename = "box")]
    pub box_: BoxConfig,
    #[serde(default, with = "kind_tagged")]
    pub pcloud: PCloudConfig,
    #[serde(default, with = "kind_tagged")]
    pub yandexdisk: YandexDiskConfig,
    #[serde(default, with = "kind_tagged")]
    pub koofr: KoofrConfig,
    #[serde(default, with = "kind_tagged")]
    pub azureblobstorage: AzureBlobStorageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pro: Option<ProAccount>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PluginSettings {
    /// Backend selected by `serviceType`, if it is one this crate manages.
    pub fn active_backend(&self) -> Option<BackendKind> {
        BackendKind::parse(&self.service_type)
    }

    /// Copy of the record stored for `kind`.
    pub fn backend(&self, kind: BackendKind) -> BackendConfig {
        match kind {
            BackendKind::OnedriveFull => self.onedrivefull.clone().into(),
            BackendKind::GoogleDrive => self.googledrive.clone().into(),
            BackendKind::Box => self.box_.clone().into(),
            BackendKind::PCloud => self.pcloud.clone().into(),
            BackendKind::YandexDisk => self.yandexdisk.clone().into(),
            BackendKind::Koofr => self.koofr.clone().into(),
            BackendKind::AzureBlobStorage => self.azureblobstorage.clone().into(),
        }
    }

    /// Replace the record in the slot matching the config's kind.
    pub fn set_backend(&mut self, config: BackendConfig) {
        match config {
            BackendConfig::OnedriveFull(c) => self.onedrivefull = c,
            BackendConfig::GoogleDrive(c) => self.googledrive = c,
            BackendConfig::Box(c) => self.box_ = c,
            BackendConfig::PCloud(c) => self.pcloud = c,
            BackendConfig::YandexDisk(c) => self.yandexdisk = c,
            BackendConfig::Koofr(c) => self.koofr = c,
            BackendConfig::AzureBlobStorage(c) => self.azureblobstorage = c,
        }
    }

    /// Mutate one backend record through the uniform [`BackendConfig`] view.
    pub fn update_backend<R>(
        &mut self,
        kind: BackendKind,
        f: impl FnOnce(&mut BackendConfig) -> R,
    ) -> R {
        let mut config = self.backend(kind);
        let result = f(&mut config);
        self.set_backend(config);
        result
    }

    /// Wipe every credential set whose deletion deadline has been reached.
    ///
    /// Checks all backends plus the Pro account, whichever is active.
    pub fn wipe_expired_credentials(&mut self, now_ms: i64) -> Vec<AuthTarget> {
        let mut wiped = Vec::new();
        for kind in BackendKind::ALL {
            if self.update_backend(kind, |config| config.wipe_if_due(now_ms)) {
                wiped.push(AuthTarget::Backend(kind));
            }
        }
        if self
            .pro
            .as_ref()
            .is_some_and(|account| account.is_deletion_due(now_ms))
        {
            self.pro = None;
            wiped.push(AuthTarget::Pro);
        }
        wiped
    }
}

/// JSON load/save of [`PluginSettings`] over a [`SettingsStore`].
pub struct SettingsRepository {
    store: Arc<dyn SettingsStore>,
    write_lock: Mutex<()>,
}

impl SettingsRepository {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Read the stored document. A missing document yields defaults; an
    /// unparsable one is an error and is left in place.
    pub async fn load(&self) -> Result<PluginSettings> {
        let raw = self
            .store
            .get_string(SETTINGS_KEY)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        match raw {
            None => Ok(PluginSettings::default()),
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                error!(error = %e, "Stored plugin settings could not be parsed");
                AuthError::CorruptSettings(e.to_string())
            }),
        }
    }

    pub async fn save(&self, settings: &PluginSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(settings).await
    }

    /// Load, apply `f`, and persist the full document once if anything
    /// changed. Concurrent updates are serialized.
    pub async fn update<R>(&self, f: impl FnOnce(&mut PluginSettings) -> R) -> Result<R> {
        let _guard = self.write_lock.lock().await;
        let before = self.load().await?;
        let mut after = before.clone();
        let result = f(&mut after);
        if after != before {
            self.persist(&after).await?;
        }
        Ok(result)
    }

    async fn persist(&self, settings: &PluginSettings) -> Result<()> {
        let json = serde_json::to_string(settings)
            .map_err(|e| AuthError::Storage(format!("Failed to serialize settings: {e}")))?;
        self.store
            .set_string(SETTINGS_KEY, &json)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        debug!(bytes = json.len(), "Persisted plugin settings");
        Ok(())
    }
}
