use crate::domain::{Configuration, Preferences};
use crate::storage::{PersistentStore, StorageError, StoreExt, StoreKey};

/// The stored half of the consent decision.
///
/// Together with the active [`Configuration`] this is everything the
/// consent decision depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentState {
    /// Last saved preferences snapshot
    pub preferences: Option<Preferences>,
    /// Configuration version `preferences` was saved against
    pub consented_version: Option<String>,
}

impl ConsentState {
    /// Read the stored snapshot and version marker.
    pub fn load(store: &dyn PersistentStore) -> Result<Self, StorageError> {
        Ok(ConsentState {
            preferences: store.get_json(StoreKey::Preferences)?,
            consented_version: store.get_string(StoreKey::ConsentedVersion)?,
        })
    }

    /// Whether the user must be asked (again).
    pub fn needs_consent(&self, config: &Configuration) -> bool {
        if !config.show_banner {
            return false;
        }

        if self.preferences.is_none() {
            return true;
        }

        self.consented_version.as_deref() != Some(config.version.as_str())
    }

    /// Stored preferences, or the configuration's defaults.
    pub fn categories(&self, config: &Configuration) -> Preferences {
        self.preferences
            .clone()
            .unwrap_or_else(|| default_preferences(config))
    }

    /// Consent for one category.
    ///
    /// With stored preferences the snapshot decides and unknown keys are
    /// disabled; without them the initial category list decides.
    pub fn is_category_enabled(&self, config: &Configuration, key: &str) -> bool {
        match &self.preferences {
            Some(preferences) => preferences.is_enabled(key).unwrap_or(false),
            None => config.is_initially_enabled(key),
        }
    }
}

/// Snapshot used before the user has decided: initial categories enabled.
pub fn default_preferences(config: &Configuration) -> Preferences {
    Preferences::from_pairs(
        false,
        config
            .initial_categories
            .initial
            .iter()
            .map(|key| (key.as_str(), true)),
    )
}

/// Every catalog category enabled.
pub fn accept_all(config: &Configuration) -> Preferences {
    Preferences::from_pairs(
        true,
        config.category_keys().into_iter().map(|key| (key, true)),
    )
}

/// Only always-on categories enabled; every other catalog key disabled.
pub fn reject_all(config: &Configuration) -> Preferences {
    let essential = config.essential_categories();

    Preferences::from_pairs(
        true,
        config.category_keys().into_iter().map(|key| {
            let enabled = essential.contains(&key);
            (key, enabled)
        }),
    )
}
