use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics registry for the consent engine.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Configuration loads that produced a configuration
    pub config_loads_total: AtomicU64,
    pub config_load_errors: AtomicU64,

    /// Loads answered from the local cache after a fetch failure
    pub config_cache_fallbacks: AtomicU64,

    /// Individual fetch attempts, including retries
    pub config_load_attempts: AtomicU64,

    /// Event delivery
    pub events_delivered_total: AtomicU64,
    pub events_queued_total: AtomicU64,

    /// Outbox replay cycles
    pub retry_cycles_total: AtomicU64,

    /// Preference saves committed locally
    pub saves_total: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record the outcome of a full configuration load.
    pub fn record_config_load(&self, success: bool) {
        if success {
            self.config_loads_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.config_load_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_load_attempt(&self) {
        self.config_load_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_fallback(&self) {
        self.config_cache_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event delivery attempt; failures end up in the outbox.
    pub fn record_delivery(&self, delivered: bool) {
        if delivered {
            self.events_delivered_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_queued_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_retry_cycle(&self) {
        self.retry_cycles_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save(&self) {
        self.saves_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP consentr_config_loads_total Configuration loads that produced a configuration
# TYPE consentr_config_loads_total counter
consentr_config_loads_total {}

# HELP consentr_config_load_errors_total Configuration loads that failed
# TYPE consentr_config_load_errors_total counter
consentr_config_load_errors_total {}

# HELP consentr_config_cache_fallbacks_total Loads served from the local cache
# TYPE consentr_config_cache_fallbacks_total counter
consentr_config_cache_fallbacks_total {}

# HELP consentr_config_load_attempts_total Configuration fetch attempts
# TYPE consentr_config_load_attempts_total counter
consentr_config_load_attempts_total {}

# HELP consentr_events Event delivery outcomes
# TYPE consentr_events counter
consentr_events{{outcome="delivered"}} {}
consentr_events{{outcome="queued"}} {}

# HELP consentr_retry_cycles_total Outbox replay cycles
# TYPE consentr_retry_cycles_total counter
consentr_retry_cycles_total {}

# HELP consentr_saves_total Preference saves committed locally
# TYPE consentr_saves_total counter
consentr_saves_total {}
"#,
            self.config_loads_total.load(Ordering::Relaxed),
            self.config_load_errors.load(Ordering::Relaxed),
            self.config_cache_fallbacks.load(Ordering::Relaxed),
            self.config_load_attempts.load(Ordering::Relaxed),
            self.events_delivered_total.load(Ordering::Relaxed),
            self.events_queued_total.load(Ordering::Relaxed),
            self.retry_cycles_total.load(Ordering::Relaxed),
            self.saves_total.load(Ordering::Relaxed),
        )
    }
}
