use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::NetworkError;
use crate::validation::ValidationError;

/// Why a fetched configuration body could not be used.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationError),
}

/// Errors surfaced by the consent engine.
#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("Consent engine is not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ConsentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_message_mentions_network() {
        let err: ConsentError = NetworkError::Connection {
            url: "https://x".into(),
            reason: "Test error".into(),
        }
        .into();

        let msg = err.to_string();
        assert!(msg.contains("Network error"));
        assert!(msg.contains("Test error"));
    }

    #[test]
    fn test_not_initialized_has_message() {
        let err = ConsentError::NotInitialized;
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_validation_wrapped_as_parse() {
        let err: ConsentError = ParseError::from(ValidationError::NoLayers).into();
        assert!(matches!(err, ConsentError::Parse(ParseError::Invalid(_))));
    }
}
