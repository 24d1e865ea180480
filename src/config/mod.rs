use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::acquisition::RetryPolicy;
use crate::transport::TransportSettings;

/// Decision to apply after the configuration is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Decision {
    /// Only report state
    None,
    /// Enable every category
    AcceptAll,
    /// Enable only always-on categories
    RejectAll,
}

/// Consent engine host configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "consentr")]
#[command(about = "Privacy consent state engine")]
pub struct Config {
    /// URL of the consent configuration document
    #[arg(long, env = "CONSENTR_CONFIG_URL")]
    pub config_url: String,

    /// Directory for persisted consent state
    #[arg(long, default_value = ".consentr", env = "CONSENTR_STORE_DIR")]
    pub store_dir: PathBuf,

    /// HTTP connect timeout in seconds
    #[arg(long, default_value = "30", env = "CONSENTR_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: u64,

    /// HTTP read timeout in seconds
    #[arg(long, default_value = "30", env = "CONSENTR_READ_TIMEOUT_SECS")]
    pub read_timeout_secs: u64,

    /// Configuration load attempts, including the first
    #[arg(long, default_value = "5", env = "CONSENTR_RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: u32,

    /// Backoff unit in milliseconds
    #[arg(long, default_value = "250", env = "CONSENTR_RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Locale code to persist for banner rendering
    #[arg(long, env = "CONSENTR_LOCALE")]
    pub locale: Option<String>,

    /// Decision to apply once initialized
    #[arg(long, value_enum, default_value = "none", env = "CONSENTR_DECISION")]
    pub decision: Decision,

    /// Print counters in Prometheus text format before exiting
    #[arg(long, default_value = "false", env = "CONSENTR_PRINT_METRICS")]
    pub print_metrics: bool,
}

impl Config {
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            config_url: String::new(),
            store_dir: PathBuf::from(".consentr"),
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            retry_max_attempts: 5,
            retry_base_delay_ms: 250,
            log_level: "info".to_string(),
            locale: None,
            decision: Decision::None,
            print_metrics: false,
        }
    }
}
