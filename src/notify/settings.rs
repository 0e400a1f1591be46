use serde::{Deserialize, Serialize};

use crate::storage::CredentialStore;

/// Store key holding the serialized [`NotificationSettings`].
pub const SETTINGS_KEY: &str = "notification_settings";

/// User preferences for alert side effects. Alerts themselves are always rendered.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub sound_enabled: bool,
    pub desktop_enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            desktop_enabled: true,
        }
    }
}

impl NotificationSettings {
    #[must_use]
    pub const fn new(sound_enabled: bool, desktop_enabled: bool) -> Self {
        Self {
            sound_enabled,
            desktop_enabled,
        }
    }

    /// Read the stored settings, falling back to defaults when absent or unreadable.
    #[must_use]
    pub fn load(store: &CredentialStore) -> Self {
        store.get_json(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save(&self, store: &CredentialStore) {
        store.set_json(SETTINGS_KEY, self);
    }
}
