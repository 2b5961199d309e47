//! User preference record synchronized between the local cache and Firestore.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// UI color scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// All preference fields. Replaced as a whole, never merged per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Email of the linked account used by default for new actions
    #[serde(default)]
    pub default_account: Option<String>,
    #[serde(default)]
    pub compact_view: bool,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            language: default_language(),
            notifications_enabled: true,
            default_account: None,
            compact_view: false,
        }
    }
}

/// A single preference mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Theme(Theme),
    Language(String),
    NotificationsEnabled(bool),
    DefaultAccount(Option<String>),
    CompactView(bool),
}

impl SettingChange {
    pub fn apply(self, preferences: &mut Preferences) {
        match self {
            SettingChange::Theme(theme) => preferences.theme = theme,
            SettingChange::Language(language) => preferences.language = language,
            SettingChange::NotificationsEnabled(on) => preferences.notifications_enabled = on,
            SettingChange::DefaultAccount(email) => preferences.default_account = email,
            SettingChange::CompactView(on) => preferences.compact_view = on,
        }
    }
}

/// Per-user settings document.
///
/// `updated_at` (milliseconds since the Unix epoch) is the only conflict key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    pub preferences: Preferences,
    #[serde(default)]
    pub updated_at: i64,
}

impl SettingsRecord {
    /// Apply a change and advance `updated_at` strictly past its previous value.
    pub fn apply(&mut self, change: SettingChange) {
        change.apply(&mut self.preferences);
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// SHA-256 over the canonical JSON form of the preferences.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.preferences).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

/// Wall-clock milliseconds, bumped past `previous` if the clock has not moved.
pub fn next_timestamp(previous: i64) -> i64 {
    Utc::now().timestamp_millis().max(previous + 1)
}

/// Process-local synchronization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Synced,
    Offline,
    Error,
}
