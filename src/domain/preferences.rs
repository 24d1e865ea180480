use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consent state for a single category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConsent {
    pub gtm_key: String,
    pub is_enabled: bool,
}

impl CategoryConsent {
    pub fn new(gtm_key: impl Into<String>, is_enabled: bool) -> Self {
        CategoryConsent {
            gtm_key: gtm_key.into(),
            is_enabled,
        }
    }
}

/// A user's consent choices.
///
/// Each save replaces the previous snapshot wholesale. Category order is
/// kept for display only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub is_customised: bool,

    #[serde(default)]
    pub cookie_options: Vec<CategoryConsent>,
}

impl Preferences {
    /// Build a snapshot from `(key, enabled)` pairs.
    ///
    /// A repeated key keeps its first position and takes the last value.
    pub fn from_pairs<I, K>(is_customised: bool, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        let mut preferences = Preferences {
            is_customised,
            cookie_options: Vec::new(),
        };

        for (key, enabled) in pairs {
            preferences.set(key, enabled);
        }

        preferences
    }

    /// Set a category, replacing an existing entry in place.
    pub fn set(&mut self, key: impl Into<String>, enabled: bool) {
        let key = key.into();

        match self.cookie_options.iter_mut().find(|c| c.gtm_key == key) {
            Some(existing) => existing.is_enabled = enabled,
            None => self.cookie_options.push(CategoryConsent::new(key, enabled)),
        }
    }

    /// Consent for `key`, or `None` if the snapshot does not mention it.
    pub fn is_enabled(&self, key: &str) -> Option<bool> {
        self.cookie_options
            .iter()
            .find(|c| c.gtm_key == key)
            .map(|c| c.is_enabled)
    }

    /// Keys of enabled categories in snapshot order.
    pub fn enabled_keys(&self) -> impl Iterator<Item = &str> {
        self.cookie_options
            .iter()
            .filter(|c| c.is_enabled)
            .map(|c| c.gtm_key.as_str())
    }

    /// Key to consent map, as sent to the backend.
    pub fn to_option_map(&self) -> BTreeMap<String, bool> {
        self.cookie_options
            .iter()
            .map(|c| (c.gtm_key.clone(), c.is_enabled))
            .collect()
    }
}
