//! # Pro Entitlements
//!
//! Time-bounded feature records and the Pro account that owns them.
//!
//! A feature is active at `t` iff `enableAtTimeMs <= t < expireAtTimeMs`.
//! Lists are short, so lookups are a linear scan.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{AuthError, Result};
use crate::oauth::IssuedTokens;
use crate::types::{FeatureTag, TokenState};

/// One entitlement window.
///
/// # Examples
///
/// ```
/// use core_auth::{FeatureInfo, FeatureTag};
///
/// let info = FeatureInfo::new(FeatureTag::Box, 1_000, 2_000).unwrap();
/// assert!(info.is_active_at(1_000));
/// assert!(!info.is_active_at(2_000));
/// assert!(FeatureInfo::new(FeatureTag::Box, 2_000, 1_000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawFeatureInfo")]
pub struct FeatureInfo {
    pub feature_name: FeatureTag,
    pub enable_at_time_ms: i64,
    pub expire_at_time_ms: i64,
}

impl FeatureInfo {
    pub fn new(feature: FeatureTag, enable_at_ms: i64, expire_at_ms: i64) -> Result<Self> {
        if enable_at_ms > expire_at_ms {
            return Err(AuthError::CorruptSettings(format!(
                "{feature} enables at {enable_at_ms} after it expires at {expire_at_ms}"
            )));
        }
        Ok(Self {
            feature_name: feature,
            enable_at_time_ms: enable_at_ms,
            expire_at_time_ms: expire_at_ms,
        })
    }

    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.enable_at_time_ms <= now_ms && now_ms < self.expire_at_time_ms
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeatureInfo {
    feature_name: FeatureTag,
    #[serde(deserialize_with = "int_or_string")]
    enable_at_time_ms: i64,
    #[serde(deserialize_with = "int_or_string")]
    expire_at_time_ms: i64,
}

impl TryFrom<RawFeatureInfo> for FeatureInfo {
    type Error = AuthError;

    fn try_from(raw: RawFeatureInfo) -> Result<Self> {
        FeatureInfo::new(raw.feature_name, raw.enable_at_time_ms, raw.expire_at_time_ms)
    }
}

/// Accept `123` as well as `"123"`. The licensing backend emits 64-bit
/// values that some hosts stringify.
fn int_or_string<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(value),
        IntOrString::Str(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse an entitlement list, dropping entries that are malformed or carry
/// a tag this build does not know.
pub fn parse_feature_list(values: Vec<serde_json::Value>) -> Vec<FeatureInfo> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<FeatureInfo>(value) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid entitlement entry");
                None
            }
        })
        .collect()
}

fn lenient_features<'de, D>(deserializer: D) -> std::result::Result<Vec<FeatureInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?;
    Ok(parse_feature_list(values.unwrap_or_default()))
}

/// Pro account record as persisted under `pro` in the settings document.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProAccount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub access_token_expires_in_ms: i64,
    #[serde(default)]
    pub access_token_expires_at_time_ms: i64,
    #[serde(default, deserialize_with = "lenient_features")]
    pub enabled_pro_features: Vec<FeatureInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_should_be_deleted_at_time_ms: Option<i64>,
}

impl ProAccount {
    /// Account created by a first successful sign-in.
    pub fn from_tokens(tokens: &IssuedTokens) -> Self {
        let mut account = Self::default();
        account.apply_tokens(tokens);
        account
    }

    /// Write a freshly issued token tuple in one assignment.
    pub fn apply_tokens(&mut self, tokens: &IssuedTokens) {
        let expires_in_ms = tokens.expires_in_ms();
        *self = ProAccount {
            refresh_token: tokens
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.take()),
            access_token: tokens.access_token.clone(),
            access_token_expires_in_ms: expires_in_ms,
            access_token_expires_at_time_ms: tokens.issued_at_ms.saturating_add(expires_in_ms),
            ..std::mem::take(self)
        };
    }

    pub fn token_state(&self) -> TokenState {
        TokenState {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_at_ms: self.access_token_expires_at_time_ms,
        }
    }

    /// Replace the entitlement list wholesale. An empty list deactivates
    /// every feature.
    pub fn replace_features(&mut self, features: Vec<FeatureInfo>) {
        self.enabled_pro_features = features;
    }

    pub fn is_feature_active(&self, feature: FeatureTag, now_ms: i64) -> bool {
        is_feature_active(self, feature, now_ms)
    }

    /// Tags active at `now_ms`, deduplicated, in list order.
    pub fn active_features(&self, now_ms: i64) -> Vec<FeatureTag> {
        let mut active = Vec::new();
        for info in &self.enabled_pro_features {
            if info.is_active_at(now_ms) && !active.contains(&info.feature_name) {
                active.push(info.feature_name);
            }
        }
        active
    }

    pub fn is_deletion_due(&self, now_ms: i64) -> bool {
        self.credentials_should_be_deleted_at_time_ms
            .is_some_and(|deadline| deadline <= now_ms)
    }
}

impl fmt::Debug for ProAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProAccount")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("access_token", &"[REDACTED]")
            .field(
                "access_token_expires_at_time_ms",
                &self.access_token_expires_at_time_ms,
            )
            .field("enabled_pro_features", &self.enabled_pro_features)
            .field(
                "credentials_should_be_deleted_at_time_ms",
                &self.credentials_should_be_deleted_at_time_ms,
            )
            .finish()
    }
}

/// True iff some entry for `feature` satisfies `enable <= now < expire`.
pub fn is_feature_active(account: &ProAccount, feature: FeatureTag, now_ms: i64) -> bool {
    account
        .enabled_pro_features
        .iter()
        .any(|info| info.feature_name == feature && info.is_active_at(now_ms))
}

/// Body returned by the licensing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementResponse {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_features")]
    pub enabled_pro_features: Vec<FeatureInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account_with(features: Vec<FeatureInfo>) -> ProAccount {
        ProAccount {
            access_token: "pro-access".into(),
            enabled_pro_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn test_feature_window_boundaries() {
        let account = account_with(vec![
            FeatureInfo::new(FeatureTag::GoogleDrive, 100, 200).unwrap()
        ]);
        assert!(!is_feature_active(&account, FeatureTag::GoogleDrive, 99));
        assert!(is_feature_active(&account, FeatureTag::GoogleDrive, 100));
        assert!(is_feature_active(&account, FeatureTag::GoogleDrive, 199));
        assert!(!is_feature_active(&account, FeatureTag::GoogleDrive, 200));
        assert!(!is_feature_active(&account, FeatureTag::Box, 150));
    }

    #[test]
    fn test_zero_length_window_is_never_active() {
        let info = FeatureInfo::new(FeatureTag::Koofr, 500, 500).unwrap();
        assert!(!info.is_active_at(500));
    }

    #[test]
    fn test_empty_replacement_deactivates_everything() {
        let mut account = account_with(vec![
            FeatureInfo::new(FeatureTag::Box, 0, i64::MAX).unwrap(),
            FeatureInfo::new(FeatureTag::SmartConflict, 0, i64::MAX).unwrap(),
        ]);
        assert_eq!(account.active_features(10).len(), 2);

        account.replace_features(Vec::new());
        for tag in FeatureTag::ALL {
            assert!(!account.is_feature_active(tag, 10));
        }
    }

    #[test]
    fn test_timestamps_accept_strings() {
        let info: FeatureInfo = serde_json::from_value(json!({
            "featureName": "feature-pcloud",
            "enableAtTimeMs": "1700000000000",
            "expireAtTimeMs": 1800000000000i64
        }))
        .unwrap();
        assert_eq!(info.enable_at_time_ms, 1_700_000_000_000);
        assert_eq!(info.expire_at_time_ms, 1_800_000_000_000);
    }

    #[test]
    fn test_inverted_window_is_rejected() {
        let result = serde_json::from_value::<FeatureInfo>(json!({
            "featureName": "feature-box",
            "enableAtTimeMs": 10,
            "expireAtTimeMs": 5
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_feature_list_skips_unknown_tags() {
        let parsed = parse_feature_list(vec![
            json!({"featureName": "feature-teleport", "enableAtTimeMs": 0, "expireAtTimeMs": 1}),
            json!({"featureName": "feature-koofr", "enableAtTimeMs": 0, "expireAtTimeMs": 1}),
        ]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].feature_name, FeatureTag::Koofr);
    }

    #[test]
    fn test_pro_account_round_trip_field_names() {
        let account = ProAccount::from_tokens(&IssuedTokens {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_in_secs: 60,
            issued_at_ms: 1_000,
        });
        let value = serde_json::to_value(&account).unwrap();
        assert_eq!(value["accessTokenExpiresInMs"], 60_000);
        assert_eq!(value["accessTokenExpiresAtTimeMs"], 61_000);
        assert_eq!(value["refreshToken"], "rt");
        assert_eq!(value["enabledProFeatures"], json!([]));
        assert!(value.get("email").is_none());
    }

    #[test]
    fn test_refresh_keeps_features_and_old_refresh_token() {
        let mut account = account_with(vec![
            FeatureInfo::new(FeatureTag::Box, 0, 10).unwrap()
        ]);
        account.refresh_token = Some("rt-old".into());
        account.apply_tokens(&IssuedTokens {
            access_token: "at-2".into(),
            refresh_token: None,
            expires_in_secs: 10,
            issued_at_ms: 0,
        });
        assert_eq!(account.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(account.enabled_pro_features.len(), 1);
        assert_eq!(account.access_token, "at-2");
    }

    #[test]
    fn test_deletion_due() {
        let mut account = ProAccount::default();
        assert!(!account.is_deletion_due(i64::MAX));
        account.credentials_should_be_deleted_at_time_ms = Some(50);
        assert!(!account.is_deletion_due(49));
        assert!(account.is_deletion_due(50));
    }
}
