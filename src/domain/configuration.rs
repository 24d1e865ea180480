use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Remotely published banner configuration.
///
/// Fields missing from the payload deserialize to empty values so that the
/// validator, not the parser, reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// Identity of this published configuration
    #[serde(default)]
    pub version: String,

    /// Customer the banner belongs to
    #[serde(default)]
    pub customer_id: String,

    /// Host that receives consent events
    #[serde(default)]
    pub privacy_domain: String,

    #[serde(default)]
    pub consent_policy: ConsentPolicy,

    /// Whether the banner is shown at all
    #[serde(default = "default_show_banner")]
    pub show_banner: bool,

    #[serde(default)]
    pub consent_mode: ConsentMode,

    /// Categories enabled before the user decides
    #[serde(default)]
    pub initial_categories: InitialCategories,

    #[serde(default)]
    pub layout: Layout,
}

fn default_show_banner() -> bool {
    true
}

/// Consent policy the configuration was published under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPolicy {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub default: bool,
}

/// Whether categories start disabled (opt-in) or enabled (opt-out).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsentMode {
    OptIn,
    OptOut,
    /// A value this crate does not recognize; rejected by validation
    Unrecognized(String),
}

impl ConsentMode {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, ConsentMode::Unrecognized(_))
    }
}

impl Default for ConsentMode {
    fn default() -> Self {
        ConsentMode::Unrecognized(String::new())
    }
}

impl From<String> for ConsentMode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "optin" => ConsentMode::OptIn,
            "optout" => ConsentMode::OptOut,
            _ => ConsentMode::Unrecognized(s),
        }
    }
}

impl From<ConsentMode> for String {
    fn from(mode: ConsentMode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for ConsentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentMode::OptIn => write!(f, "optin"),
            ConsentMode::OptOut => write!(f, "optout"),
            ConsentMode::Unrecognized(s) => write!(f, "{}", s),
        }
    }
}

/// Default-enabled category keys, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialCategories {
    #[serde(default)]
    pub initial: Vec<String>,
}

/// Banner layout: a set of layers keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub default_layer_id: Option<String>,

    #[serde(default)]
    pub consent_layers: BTreeMap<String, Layer>,
}

/// One screen of the banner flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub elements: Vec<Element>,
}

/// A UI element inside a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub element_type: ElementType,

    /// Layer this element navigates to, if any
    #[serde(default)]
    pub target_consent_layer: Option<String>,

    #[serde(default)]
    pub consent_categories: Vec<CategoryDef>,
}

/// Kind of UI element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementType {
    Text,
    Button,
    Link,
    Category,
    BrowserSignal,
    Unrecognized(String),
}

impl Default for ElementType {
    fn default() -> Self {
        ElementType::Unrecognized(String::new())
    }
}

impl ElementType {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, ElementType::Unrecognized(_))
    }
}

impl From<String> for ElementType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => ElementType::Text,
            "button" => ElementType::Button,
            "link" => ElementType::Link,
            "category" => ElementType::Category,
            "browser_signal" => ElementType::BrowserSignal,
            _ => ElementType::Unrecognized(s),
        }
    }
}

impl From<ElementType> for String {
    fn from(t: ElementType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Text => write!(f, "text"),
            ElementType::Button => write!(f, "button"),
            ElementType::Link => write!(f, "link"),
            ElementType::Category => write!(f, "category"),
            ElementType::BrowserSignal => write!(f, "browser_signal"),
            ElementType::Unrecognized(s) => write!(f, "{}", s),
        }
    }
}

/// A consent category declared by an element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDef {
    #[serde(default)]
    pub gtm_key: String,

    /// Must stay enabled in bulk accept/reject
    #[serde(default)]
    pub always_on: bool,

    #[serde(default)]
    pub hidden: bool,

    /// Localized text keyed by locale code
    #[serde(default)]
    pub translations: BTreeMap<String, CategoryTranslation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTranslation {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub description: Option<String>,
}

impl Configuration {
    /// Every category declared anywhere in the layout.
    ///
    /// Layers are visited in id order and elements in declared order; when a
    /// key is declared more than once the first declaration wins.
    pub fn category_catalog(&self) -> Vec<&CategoryDef> {
        let mut seen = HashSet::new();

        self.layout
            .consent_layers
            .values()
            .flat_map(|layer| layer.elements.iter())
            .flat_map(|element| element.consent_categories.iter())
            .filter(|category| seen.insert(category.gtm_key.as_str()))
            .collect()
    }

    /// Catalog keys in catalog order.
    pub fn category_keys(&self) -> Vec<String> {
        self.category_catalog()
            .into_iter()
            .map(|c| c.gtm_key.clone())
            .collect()
    }

    /// Keys of every always-on category, scanned across all layers.
    pub fn essential_categories(&self) -> BTreeSet<String> {
        self.layout
            .consent_layers
            .values()
            .flat_map(|layer| layer.elements.iter())
            .flat_map(|element| element.consent_categories.iter())
            .filter(|category| category.always_on)
            .map(|category| category.gtm_key.clone())
            .collect()
    }

    /// Whether `key` is enabled before the user has decided.
    pub fn is_initially_enabled(&self, key: &str) -> bool {
        self.initial_categories.initial.iter().any(|k| k == key)
    }

    /// Label for a category in `locale`, falling back to any translation.
    pub fn category_label(&self, key: &str, locale: &str) -> Option<&str> {
        let category = self
            .category_catalog()
            .into_iter()
            .find(|c| c.gtm_key == key)?;

        category
            .translations
            .get(locale)
            .or_else(|| category.translations.values().next())
            .map(|t| t.label.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Configuration;

    /// A small, valid configuration with one essential category.
    pub fn sample_json(version: &str) -> String {
        format!(
            r#"{{
  "version": "{version}",
  "customerId": "cust-42",
  "privacyDomain": "privacy.example.com",
  "consentPolicy": {{ "name": "default-policy", "default": true }},
  "showBanner": true,
  "consentMode": "optin",
  "initialCategories": {{ "initial": ["category_essential", "category_analytics"] }},
  "layout": {{
    "defaultLayerId": "main",
    "consentLayers": {{
      "main": {{
        "id": "main",
        "elements": [
          {{ "id": "intro", "type": "text" }},
          {{ "id": "prefs", "type": "button", "targetConsentLayer": "details" }}
        ]
      }},
      "details": {{
        "id": "details",
        "elements": [
          {{
            "id": "cats",
            "type": "category",
            "consentCategories": [
              {{ "gtmKey": "category_essential", "alwaysOn": true,
                 "translations": {{ "en": {{ "label": "Essential" }} }} }},
              {{ "gtmKey": "category_analytics",
                 "translations": {{ "en": {{ "label": "Analytics" }}, "fr": {{ "label": "Analytique" }} }} }},
              {{ "gtmKey": "category_marketing",
                 "translations": {{ "en": {{ "label": "Marketing" }} }} }}
            ]
          }}
        ]
      }}
    }}
  }}
}}"#
        )
    }

    pub fn sample(version: &str) -> Configuration {
        serde_json::from_str(&sample_json(version)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_sample() {
        let config = fixtures::sample("v1");

        assert_eq!(config.version, "v1");
        assert_eq!(config.consent_mode, ConsentMode::OptIn);
        assert_eq!(config.layout.consent_layers.len(), 2);
        assert_eq!(
            config.category_keys(),
            vec!["category_essential", "category_analytics", "category_marketing"]
        );
    }

    #[test]
    fn test_unknown_fields_ignored_and_defaults_applied() {
        let config: Configuration =
            serde_json::from_str(r#"{"version":"v9","somethingNew":{"a":1}}"#).unwrap();

        assert_eq!(config.version, "v9");
        assert!(config.show_banner);
        assert!(!config.consent_mode.is_recognized());
        assert!(config.layout.consent_layers.is_empty());
    }

    #[test]
    fn test_unrecognized_values_are_preserved() {
        let config: Configuration = serde_json::from_str(
            r#"{"consentMode":"maybe","layout":{"consentLayers":{"a":{"elements":[{"type":"carousel"}]}}}}"#,
        )
        .unwrap();

        assert_eq!(config.consent_mode, ConsentMode::Unrecognized("maybe".into()));
        let element = &config.layout.consent_layers["a"].elements[0];
        assert_eq!(element.element_type, ElementType::Unrecognized("carousel".into()));
    }

    #[test]
    fn test_essential_categories_span_layers() {
        let mut config = fixtures::sample("v1");
        config
            .layout
            .consent_layers
            .get_mut("main")
            .unwrap()
            .elements
            .push(Element {
                id: "legal".into(),
                element_type: ElementType::Category,
                target_consent_layer: None,
                consent_categories: vec![CategoryDef {
                    gtm_key: "category_legal".into(),
                    always_on: true,
                    ..Default::default()
                }],
            });

        let essential = config.essential_categories();
        assert!(essential.contains("category_essential"));
        assert!(essential.contains("category_legal"));
        assert_eq!(essential.len(), 2);
    }

    #[test]
    fn test_category_label_fallback() {
        let config = fixtures::sample("v1");

        assert_eq!(config.category_label("category_analytics", "fr"), Some("Analytique"));
        assert_eq!(config.category_label("category_marketing", "de"), Some("Marketing"));
        assert_eq!(config.category_label("category_unknown", "en"), None);
    }
}
