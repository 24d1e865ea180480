use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Installation-wide random identifier sent with every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(pub String);

impl UniqueId {
    pub fn generate() -> Self {
        UniqueId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-call session identifier; the backend deduplicates on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identifiers attached to one outgoing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    pub unique_id: UniqueId,
    pub session_id: SessionId,
}

impl EventIdentity {
    /// Pair a stable unique id with a fresh session id.
    pub fn fresh_session(unique_id: UniqueId) -> Self {
        EventIdentity {
            unique_id,
            session_id: SessionId::generate(),
        }
    }
}
