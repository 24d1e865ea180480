use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::traits::{HttpRequest, Method, NetworkError, Transport};

/// Fixed timeouts applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    settings: TransportSettings,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .user_agent(concat!("consentr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetworkError::Connection {
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(HttpTransport { client, settings })
    }

    /// Wrap a preconfigured client; `settings` is informational only.
    pub fn with_client(client: reqwest::Client, settings: TransportSettings) -> Self {
        HttpTransport { client, settings }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn map_error(url: &str, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
        } else {
            NetworkError::Connection {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: &HttpRequest) -> Result<String, NetworkError> {
        let url = request.url.as_str();

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        let status = response.status();
        debug!(method = %request.method, url = url, status = status.as_u16(), "HTTP response");

        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| Self::map_error(url, e))
    }
}
