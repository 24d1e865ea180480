use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use consentr::config::{Config, Decision};
use consentr::observability::init_tracing;
use consentr::storage::FileStore;
use consentr::transport::HttpTransport;
use consentr::{ConsentEngine, ConsentError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    init_tracing(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        store = %config.store_dir.display(),
        "Starting consentr"
    );

    let store = Arc::new(FileStore::open(&config.store_dir)?);
    let transport = Arc::new(HttpTransport::new(config.transport_settings())?);
    let engine = ConsentEngine::new(store, transport, config.retry_policy());

    if let Some(locale) = &config.locale {
        engine.set_locale(locale)?;
    }

    let active = engine.initialize(&config.config_url).await?;

    info!(
        version = %active.version,
        needs_consent = engine.needs_consent()?,
        essential = ?engine.essential_categories()?,
        locale = ?engine.locale()?,
        "Consent state"
    );

    if engine.needs_consent()? {
        engine.track_banner_open().await?;
    }

    let decided = match config.decision {
        Decision::None => Ok(()),
        Decision::AcceptAll => engine.accept_all().await,
        Decision::RejectAll => engine.reject_all().await,
    };

    match decided {
        Ok(()) => {}
        Err(ConsentError::Network(e)) => {
            warn!(error = %e, "Preferences saved locally, delivery deferred")
        }
        Err(e) => return Err(e.into()),
    }

    let outcome = engine.retry_pending().await?;
    info!(
        delivered = outcome.delivered,
        failed = outcome.failed,
        pending = engine.pending_count()?,
        "Outbox drained"
    );

    for preference in engine.get_categories()?.cookie_options {
        info!(
            category = %preference.gtm_key,
            enabled = preference.is_enabled,
            "Category"
        );
    }

    if config.print_metrics {
        print!("{}", engine.metrics().to_prometheus());
    }

    Ok(())
}
