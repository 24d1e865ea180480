use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure to complete a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network error: {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Network error: request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error: request to {url} failed: {reason}")]
    Connection { url: String, reason: String },
}

impl NetworkError {
    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A single HTTP-style request.
///
/// Serializable so undelivered events can be persisted and replayed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest {
            url: url.into(),
            method: Method::Get,
            body: None,
            headers: Vec::new(),
        }
    }

    /// POST with a JSON body and matching content type.
    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        HttpRequest {
            url: url.into(),
            method: Method::Post,
            body: Some(body),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        }
    }
}

/// Performs one request and returns the response body.
///
/// Implementations fail with [`NetworkError`] on non-2xx status or I/O
/// failure. Timeouts are fixed per transport, not per call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: &HttpRequest) -> Result<String, NetworkError>;
}
