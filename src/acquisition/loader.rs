use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::Configuration;
use crate::error::{ConsentError, ParseError};
use crate::observability::MetricsRegistry;
use crate::storage::{PersistentStore, StorageError, StoreExt, StoreKey};
use crate::transport::{HttpRequest, Transport};
use crate::validation::validate;

use super::retry::{retry_with_backoff, RetryPolicy};

/// Parse and validate a configuration body.
pub fn parse_configuration(body: &str) -> Result<Configuration, ParseError> {
    let config: Configuration = serde_json::from_str(body)?;
    validate(&config)?;
    Ok(config)
}

/// Fetches, validates and caches remote configurations.
pub struct ConfigLoader {
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistentStore>,
    retry: RetryPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl ConfigLoader {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
        retry: RetryPolicy,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        ConfigLoader {
            transport,
            store,
            retry,
            metrics,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Load a configuration, retrying with exponential backoff.
    ///
    /// A cache hit inside an attempt counts as success and ends the loop.
    pub async fn load(&self, url: &str) -> Result<Configuration, ConsentError> {
        let result = retry_with_backoff(self.retry, |attempt| async move {
            debug!(url = url, attempt = attempt, "Loading configuration");
            self.metrics.record_load_attempt();
            self.load_once(url).await
        })
        .await;

        self.metrics.record_config_load(result.is_ok());
        result
    }

    /// One fetch attempt with fallback to the cached configuration.
    pub async fn load_once(&self, url: &str) -> Result<Configuration, ConsentError> {
        let err = match self.fetch(url).await {
            Ok(config) => {
                self.store.put_json(StoreKey::ConfigCache, &config)?;
                info!(version = %config.version, "Fetched configuration");
                return Ok(config);
            }
            Err(e) => e,
        };

        match self.cached() {
            Ok(Some(config)) => {
                warn!(
                    error = %err,
                    version = %config.version,
                    "Configuration fetch failed, using cached configuration"
                );
                self.metrics.record_cache_fallback();
                Ok(config)
            }
            Ok(None) => Err(err),
            Err(cache_err) => {
                warn!(
                    error = %err,
                    cache_error = %cache_err,
                    "Configuration fetch failed and cache is unreadable"
                );
                Err(err)
            }
        }
    }

    /// The last configuration that fetched and validated successfully.
    pub fn cached(&self) -> Result<Option<Configuration>, StorageError> {
        self.store.get_json(StoreKey::ConfigCache)
    }

    async fn fetch(&self, url: &str) -> Result<Configuration, ConsentError> {
        let body = self.transport.request(&HttpRequest::get(url)).await?;
        Ok(parse_configuration(&body)?)
    }
}
