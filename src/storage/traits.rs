// src/storage/traits.rs
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by a persistent store.
///
/// A missing key is never an error; `get` returns `Ok(None)` for it.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error for key {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checksum mismatch for key {key}: expected {expected:08x}, got {actual:08x}")]
    Corrupt {
        key: String,
        expected: u32,
        actual: u32,
    },

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Value for key {0} is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Logical keys owned by the consent engine.
///
/// Each entity lives under its own key and is replaced atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// Current preferences snapshot
    Preferences,
    /// Configuration version the stored preferences were given against
    ConsentedVersion,
    /// Last configuration that fetched and validated successfully
    ConfigCache,
    /// Ordered list of undelivered events
    PendingEvents,
    /// Installation-wide random identifier
    UniqueId,
    /// Selected locale code
    Locale,
}

impl StoreKey {
    /// Every key the engine writes, in no particular order.
    pub const ALL: [StoreKey; 6] = [
        StoreKey::Preferences,
        StoreKey::ConsentedVersion,
        StoreKey::ConfigCache,
        StoreKey::PendingEvents,
        StoreKey::UniqueId,
        StoreKey::Locale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Preferences => "preferences",
            StoreKey::ConsentedVersion => "config-version",
            StoreKey::ConfigCache => "config-cache",
            StoreKey::PendingEvents => "pending-events",
            StoreKey::UniqueId => "unique-id",
            StoreKey::Locale => "locale",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key/value storage.
///
/// Calls are synchronous and must be durable before they return.
pub trait PersistentStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Typed JSON access on top of any [`PersistentStore`].
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StorageError>;

    fn put_json<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<(), StorageError>;

    fn get_string(&self, key: StoreKey) -> Result<Option<String>, StorageError>;

    fn put_string(&self, key: StoreKey, value: &str) -> Result<(), StorageError>;
}

impl<S: PersistentStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.get(key.as_str())? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Serialization {
                key: key.as_str().to_string(),
                source,
            })
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
            key: key.as_str().to_string(),
            source,
        })?;
        self.put(key.as_str(), &bytes)
    }

    fn get_string(&self, key: StoreKey) -> Result<Option<String>, StorageError> {
        match self.get(key.as_str())? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::InvalidUtf8(key.as_str().to_string())),
            None => Ok(None),
        }
    }

    fn put_string(&self, key: StoreKey, value: &str) -> Result<(), StorageError> {
        self.put(key.as_str(), value.as_bytes())
    }
}
