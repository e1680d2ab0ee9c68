//! Remote base directory normalization.
//!
//! Every remote base directory goes through [`normalize_remote_base_dir`]
//! exactly once, when a [`RemoteBaseDir`] is built. Nothing else in the
//! crate manipulates the raw user string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Split on `/`, trim every segment, drop the empty ones and re-join.
///
/// Total and idempotent.
///
/// ```
/// use core_auth::path::normalize_remote_base_dir;
///
/// assert_eq!(
///     normalize_remote_base_dir("/ MyNotes // Test / ObsidianTest /"),
///     "MyNotes/Test/ObsidianTest"
/// );
/// assert_eq!(normalize_remote_base_dir("///"), "");
/// ```
pub fn normalize_remote_base_dir(raw: &str) -> String {
    raw.split('/')
        .map(|segment| segment.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A normalized remote base directory.
///
/// Deserializing runs the normalizer too, so values written by older
/// builds are cleaned up on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RemoteBaseDir(String);

impl RemoteBaseDir {
    pub fn new(raw: &str) -> Self {
        Self(normalize_remote_base_dir(raw))
    }

    /// Normalize `raw`, returning `None` when nothing survives.
    pub fn parse(raw: &str) -> Option<Self> {
        let dir = Self::new(raw);
        (!dir.is_empty()).then_some(dir)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for RemoteBaseDir {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<RemoteBaseDir> for String {
    fn from(dir: RemoteBaseDir) -> Self {
        dir.0
    }
}

impl fmt::Display for RemoteBaseDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory actually used on the remote: the configured one, or the
/// vault name when none is set.
pub fn resolve_remote_base_dir(configured: Option<&RemoteBaseDir>, vault_name: &str) -> String {
    match configured {
        Some(dir) if !dir.is_empty() => dir.as_str().to_string(),
        _ => normalize_remote_base_dir(vault_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_examples() {
        assert_eq!(normalize_remote_base_dir(""), "");
        assert_eq!(normalize_remote_base_dir("///"), "");
        assert_eq!(normalize_remote_base_dir(" / \t/ "), "");
        assert_eq!(
            normalize_remote_base_dir("/ MyNotes // Test / ObsidianTest /"),
            "MyNotes/Test/ObsidianTest"
        );
        assert_eq!(normalize_remote_base_dir("ObsidianTest"), "ObsidianTest");
        assert_eq!(normalize_remote_base_dir("a b/ c d "), "a b/c d");
    }

    #[test]
    fn test_normalize_strips_byte_order_marks() {
        assert_eq!(normalize_remote_base_dir("\u{feff}"), "");
        assert_eq!(normalize_remote_base_dir("Notes/\u{feff}/Work"), "Notes/Work");
        assert_eq!(normalize_remote_base_dir("\u{feff} Notes \u{feff}"), "Notes");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "",
            "/",
            "  a  ",
            "a//b",
            "/ MyNotes // Test / ObsidianTest /",
            " \u{3000}日本語 / メモ ",
            "../x/./y",
            "trailing/",
        ];
        for input in inputs {
            let once = normalize_remote_base_dir(input);
            assert_eq!(normalize_remote_base_dir(&once), once, "{input:?}");
        }
    }

    #[test]
    fn test_remote_base_dir_normalizes_on_deserialize() {
        let dir: RemoteBaseDir = serde_json::from_str("\" /Notes// Work/ \"").unwrap();
        assert_eq!(dir.as_str(), "Notes/Work");
        assert_eq!(serde_json::to_string(&dir).unwrap(), "\"Notes/Work\"");
    }

    #[test]
    fn test_parse_drops_empty_paths() {
        assert_eq!(RemoteBaseDir::parse(" // "), None);
        assert_eq!(
            RemoteBaseDir::parse("/a/").map(String::from),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_resolve_falls_back_to_vault_name() {
        assert_eq!(resolve_remote_base_dir(None, "My Vault"), "My Vault");
        let empty = RemoteBaseDir::default();
        assert_eq!(resolve_remote_base_dir(Some(&empty), "Vault"), "Vault");
        let dir = RemoteBaseDir::new("Sync/Notes");
        assert_eq!(resolve_remote_base_dir(Some(&dir), "Vault"), "Sync/Notes");
    }
}
