use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::domain::{Configuration, EventIdentity, Preferences};
use crate::error::ConsentError;
use crate::transport::HttpRequest;

/// Kind of backend event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// User saved preferences; must eventually reach the backend
    SavePreferences,
    /// Banner was shown; analytics only
    BannerOpen,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::SavePreferences => write!(f, "save_preferences"),
            EventKind::BannerOpen => write!(f, "banner_open"),
        }
    }
}

/// An event awaiting delivery.
///
/// Carries the fully-built request so replay does not depend on whichever
/// configuration is active at replay time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub request: HttpRequest,
    pub created_at: DateTime<Utc>,
}

impl PendingEvent {
    fn new(kind: EventKind, request: HttpRequest) -> Self {
        PendingEvent {
            id: Uuid::new_v4(),
            kind,
            request,
            created_at: Utc::now(),
        }
    }

    /// `POST https://<privacyDomain>/api/v1/save_preferences`.
    pub fn save_preferences(
        config: &Configuration,
        preferences: &Preferences,
        identity: &EventIdentity,
    ) -> Result<Self, ConsentError> {
        let url = endpoint(config, "save_preferences")?;

        let body = json!({
            "consentPolicy": config.consent_policy.name,
            "customerId": config.customer_id,
            "isCustomised": preferences.is_customised,
            "cookieOptions": preferences.to_option_map(),
            "sessionId": identity.session_id.as_str(),
            "uniqueId": identity.unique_id.as_str(),
        });

        Ok(PendingEvent::new(
            EventKind::SavePreferences,
            HttpRequest::post_json(url.as_str(), body.to_string()),
        ))
    }

    /// `GET https://<privacyDomain>/api/v1/save_open?...`.
    pub fn banner_open(config: &Configuration, identity: &EventIdentity) -> Result<Self, ConsentError> {
        let mut url = endpoint(config, "save_open")?;

        url.query_pairs_mut()
            .append_pair("customerId", &config.customer_id)
            .append_pair("sessionId", identity.session_id.as_str())
            .append_pair("uniqueId", identity.unique_id.as_str())
            .append_pair("consentPolicy", &config.consent_policy.name);

        Ok(PendingEvent::new(
            EventKind::BannerOpen,
            HttpRequest::get(url.as_str()),
        ))
    }
}

fn endpoint(config: &Configuration, path: &str) -> Result<Url, ConsentError> {
    let raw = format!("https://{}/api/v1/{}", config.privacy_domain, path);

    Url::parse(&raw).map_err(|e| {
        ConsentError::InvalidConfiguration(format!(
            "privacy domain {:?} does not form a valid URL: {}",
            config.privacy_domain, e
        ))
    })
}
