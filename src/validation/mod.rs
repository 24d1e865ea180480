use reqwest::Url;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::domain::{Configuration, Layer};

/// Reasons a fetched configuration is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field is empty: {0}")]
    MissingField(&'static str),

    #[error("Privacy domain {0:?} is not a valid host")]
    InvalidPrivacyDomain(String),

    #[error("Unknown consent mode: {0:?}")]
    UnknownConsentMode(String),

    #[error("Configuration declares no consent layers")]
    NoLayers,

    #[error("Element {element_id} in layer {layer_id} targets unknown layer {target}")]
    DanglingLayerReference {
        layer_id: String,
        element_id: String,
        target: String,
    },

    #[error("Element {element_id} in layer {layer_id} has unknown type {element_type:?}")]
    UnknownElementType {
        layer_id: String,
        element_id: String,
        element_type: String,
    },

    #[error("Category in element {element_id} has an empty key")]
    EmptyCategoryKey { element_id: String },

    #[error("Category {gtm_key} has no localized label")]
    MissingCategoryLabel { gtm_key: String },
}

/// Validate a configuration, reporting the first rule it breaks.
///
/// Rules run in a fixed order: required fields, consent mode, layer
/// presence, layer references, element types, category definitions.
pub fn validate(config: &Configuration) -> Result<(), ValidationError> {
    check_required_fields(config)?;

    if !config.consent_mode.is_recognized() {
        return Err(ValidationError::UnknownConsentMode(
            config.consent_mode.to_string(),
        ));
    }

    let layers = &config.layout.consent_layers;
    if layers.is_empty() {
        return Err(ValidationError::NoLayers);
    }

    check_layer_references(layers)?;
    check_element_types(layers)?;
    check_categories(layers)?;

    Ok(())
}

fn check_required_fields(config: &Configuration) -> Result<(), ValidationError> {
    let required = [
        ("version", &config.version),
        ("customerId", &config.customer_id),
        ("privacyDomain", &config.privacy_domain),
        ("consentPolicy.name", &config.consent_policy.name),
    ];

    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(name));
        }
    }

    if !is_bare_host(&config.privacy_domain) {
        return Err(ValidationError::InvalidPrivacyDomain(
            config.privacy_domain.clone(),
        ));
    }

    Ok(())
}

/// Whether `domain` can stand alone as the authority of an event endpoint.
fn is_bare_host(domain: &str) -> bool {
    match Url::parse(&format!("https://{}/", domain)) {
        Ok(url) => url.path() == "/" && url.query().is_none() && url.fragment().is_none(),
        Err(_) => false,
    }
}

fn check_layer_references(layers: &BTreeMap<String, Layer>) -> Result<(), ValidationError> {
    for (layer_id, layer) in layers {
        for element in &layer.elements {
            if let Some(target) = &element.target_consent_layer {
                if !layers.contains_key(target) {
                    return Err(ValidationError::DanglingLayerReference {
                        layer_id: layer_id.clone(),
                        element_id: element.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn check_element_types(layers: &BTreeMap<String, Layer>) -> Result<(), ValidationError> {
    for (layer_id, layer) in layers {
        for element in &layer.elements {
            if !element.element_type.is_recognized() {
                return Err(ValidationError::UnknownElementType {
                    layer_id: layer_id.clone(),
                    element_id: element.id.clone(),
                    element_type: element.element_type.to_string(),
                });
            }
        }
    }

    Ok(())
}

fn check_categories(layers: &BTreeMap<String, Layer>) -> Result<(), ValidationError> {
    for layer in layers.values() {
        for element in &layer.elements {
            for category in &element.consent_categories {
                if category.gtm_key.trim().is_empty() {
                    return Err(ValidationError::EmptyCategoryKey {
                        element_id: element.id.clone(),
                    });
                }

                let has_label = category
                    .translations
                    .values()
                    .any(|t| !t.label.trim().is_empty());

                if !has_label {
                    return Err(ValidationError::MissingCategoryLabel {
                        gtm_key: category.gtm_key.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
