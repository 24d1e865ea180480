use parking_lot::RwLock;
use reqwest::Url;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::acquisition::{ConfigLoader, RetryPolicy};
use crate::domain::{Configuration, EventIdentity, Preferences, UniqueId};
use crate::error::{ConsentError, Result};
use crate::observability::MetricsRegistry;
use crate::outbox::{EventOutbox, PendingEvent, RetryOutcome};
use crate::storage::{PersistentStore, StorageError, StoreExt, StoreKey};
use crate::transport::Transport;

use super::state::{self, ConsentState};

/// Work that must never interleave: loads, saves and outbox traffic.
struct EngineCore {
    loader: ConfigLoader,
    outbox: EventOutbox,
    unique_id: Option<UniqueId>,
}

impl EngineCore {
    /// The installation id, created and persisted on first use.
    fn unique_id(
        &mut self,
        store: &dyn PersistentStore,
    ) -> std::result::Result<UniqueId, StorageError> {
        if let Some(id) = &self.unique_id {
            return Ok(id.clone());
        }

        let id = match store.get_string(StoreKey::UniqueId)? {
            Some(existing) if !existing.is_empty() => UniqueId(existing),
            _ => {
                let id = UniqueId::generate();
                store.put_string(StoreKey::UniqueId, id.as_str())?;
                id
            }
        };

        self.unique_id = Some(id.clone());
        Ok(id)
    }
}

/// The consent state engine.
///
/// Construct one per process and share it by reference. Mutating operations
/// (`initialize`, `save`, `track_banner_open`, `retry_pending`, `reset`)
/// run one at a time behind an async mutex that is held across network
/// calls. Queries are synchronous: they read the active configuration and
/// the stored consent keys under a short read lock, which writers hold
/// while replacing either.
pub struct ConsentEngine {
    store: Arc<dyn PersistentStore>,
    core: Mutex<EngineCore>,
    active: RwLock<Option<Arc<Configuration>>>,
    changes: watch::Sender<Option<Preferences>>,
    metrics: Arc<MetricsRegistry>,
}

impl ConsentEngine {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let loader = ConfigLoader::new(transport.clone(), store.clone(), retry, metrics.clone());
        let outbox = EventOutbox::new(transport, store.clone(), metrics.clone());
        let (changes, _) = watch::channel(None);

        ConsentEngine {
            store,
            core: Mutex::new(EngineCore {
                loader,
                outbox,
                unique_id: None,
            }),
            active: RwLock::new(None),
            changes,
            metrics,
        }
    }

    /// Fetch the configuration at `url` and make it active.
    ///
    /// A malformed or non-HTTP URL fails immediately. On any other failure
    /// the engine keeps whatever state it had.
    pub async fn initialize(&self, url: &str) -> Result<Arc<Configuration>> {
        let parsed = Url::parse(url)
            .map_err(|e| ConsentError::InvalidConfiguration(format!("{}: {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConsentError::InvalidConfiguration(format!(
                "{}: unsupported scheme {}",
                url,
                parsed.scheme()
            )));
        }

        let core = self.core.lock().await;
        let config = Arc::new(core.loader.load(url).await?);

        *self.active.write() = Some(config.clone());

        info!(
            version = %config.version,
            show_banner = config.show_banner,
            categories = config.category_catalog().len(),
            "Consent configuration active"
        );

        Ok(config)
    }

    /// Whether the user must be asked for consent.
    pub fn needs_consent(&self) -> Result<bool> {
        let (config, state) = self.snapshot()?;
        Ok(state.needs_consent(&config))
    }

    /// Stored preferences, or the configuration's defaults.
    pub fn get_categories(&self) -> Result<Preferences> {
        let (config, state) = self.snapshot()?;
        Ok(state.categories(&config))
    }

    pub fn is_category_enabled(&self, key: &str) -> Result<bool> {
        let (config, state) = self.snapshot()?;
        Ok(state.is_category_enabled(&config, key))
    }

    /// Keys of every always-on category in the active configuration.
    pub fn essential_categories(&self) -> Result<BTreeSet<String>> {
        Ok(self.active_config()?.essential_categories())
    }

    /// Stored preferences only; `None` until the user has saved.
    pub fn user_preferences(&self) -> Result<Option<Preferences>> {
        let (_, state) = self.snapshot()?;
        Ok(state.preferences)
    }

    /// Whether the user has saved preferences at all.
    pub fn has_user_consent(&self) -> Result<bool> {
        Ok(self.user_preferences()?.is_some())
    }

    /// Save `preferences` locally, then report them to the backend.
    ///
    /// The local write is never rolled back. If delivery fails the event is
    /// queued and the network error is still returned.
    pub async fn save(&self, preferences: Preferences) -> Result<()> {
        let mut core = self.core.lock().await;
        let config = self.active_config()?;
        self.save_locked(&mut core, &config, preferences).await
    }

    /// Enable every category.
    pub async fn accept_all(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        let config = self.active_config()?;
        self.save_locked(&mut core, &config, state::accept_all(&config))
            .await
    }

    /// Enable only always-on categories.
    pub async fn reject_all(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        let config = self.active_config()?;
        self.save_locked(&mut core, &config, state::reject_all(&config))
            .await
    }

    /// Report that the banner was shown.
    ///
    /// Delivery failures are queued for retry and never returned.
    pub async fn track_banner_open(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        let config = self.active_config()?;

        let identity = EventIdentity::fresh_session(core.unique_id(self.store.as_ref())?);
        let event = match PendingEvent::banner_open(&config, &identity) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Banner open event dropped");
                return Ok(());
            }
        };

        match core.outbox.enqueue_and_attempt(event).await {
            Err(ConsentError::Network(e)) => {
                debug!(error = %e, "Banner open event queued");
                Ok(())
            }
            other => other,
        }
    }

    /// Replay queued events in the order they were queued.
    pub async fn retry_pending(&self) -> Result<RetryOutcome> {
        let mut core = self.core.lock().await;
        Ok(core.outbox.retry_pending().await?)
    }

    /// Number of events awaiting delivery.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .store
            .get_json::<Vec<PendingEvent>>(StoreKey::PendingEvents)?
            .map_or(0, |pending| pending.len()))
    }

    /// Forget everything: stored keys and the active configuration.
    pub async fn reset(&self) -> Result<()> {
        let mut core = self.core.lock().await;

        {
            let mut active = self.active.write();
            for key in StoreKey::ALL {
                self.store.remove(key.as_str())?;
            }
            *active = None;
        }

        core.unique_id = None;
        self.changes.send_replace(None);
        info!("Consent engine reset");

        Ok(())
    }

    /// Persist the locale code the banner should render in.
    pub fn set_locale(&self, code: &str) -> Result<()> {
        Ok(self.store.put_string(StoreKey::Locale, code)?)
    }

    pub fn locale(&self) -> Result<Option<String>> {
        Ok(self.store.get_string(StoreKey::Locale)?)
    }

    /// Receive every preferences change; `None` after a reset.
    pub fn subscribe(&self) -> watch::Receiver<Option<Preferences>> {
        self.changes.subscribe()
    }

    /// The active configuration, if any.
    pub fn current_configuration(&self) -> Option<Arc<Configuration>> {
        self.active.read().clone()
    }

    /// Effective preferences, or `None` when uninitialized.
    pub fn current_preferences(&self) -> Result<Option<Preferences>> {
        match self.get_categories() {
            Ok(preferences) => Ok(Some(preferences)),
            Err(ConsentError::NotInitialized) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Persist and report `preferences` against `config`.
    ///
    /// `core` must be held so that `config` is still the active configuration.
    async fn save_locked(
        &self,
        core: &mut EngineCore,
        config: &Configuration,
        preferences: Preferences,
    ) -> Result<()> {
        {
            let _active = self.active.write();
            self.store.put_json(StoreKey::Preferences, &preferences)?;
            self.store
                .put_string(StoreKey::ConsentedVersion, &config.version)?;
        }

        self.metrics.record_save();
        info!(
            version = %config.version,
            customised = preferences.is_customised,
            "Preferences saved"
        );
        self.changes.send_replace(Some(preferences.clone()));

        let identity = EventIdentity::fresh_session(core.unique_id(self.store.as_ref())?);
        let event = PendingEvent::save_preferences(config, &preferences, &identity)?;
        core.outbox.enqueue_and_attempt(event).await
    }

    fn active_config(&self) -> Result<Arc<Configuration>> {
        self.active.read().clone().ok_or(ConsentError::NotInitialized)
    }

    fn snapshot(&self) -> Result<(Arc<Configuration>, ConsentState)> {
        let active = self.active.read();
        let config = active.clone().ok_or(ConsentError::NotInitialized)?;
        let state = ConsentState::load(self.store.as_ref())?;
        Ok((config, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::fixtures;
    use crate::domain::{CategoryDef, CategoryTranslation};
    use crate::observability::tracing::init_test_tracing;
    use crate::outbox::EventKind;
    use crate::storage::MemoryStore;
    use crate::transport::{HttpRequest, MockTransport, NetworkError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    const CONFIG_URL: &str = "https://cdn.example.com/config.json";
    const SAVE_URL: &str = "https://privacy.example.com/api/v1/save_preferences";
    const OPEN_URL: &str = "https://privacy.example.com/api/v1/save_open";

    fn setup() -> (Arc<MockTransport>, Arc<MemoryStore>, ConsentEngine) {
        init_test_tracing();
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let engine = ConsentEngine::new(store.clone(), transport.clone(), RetryPolicy::default());
        (transport, store, engine)
    }

    async fn initialized(version: &str) -> (Arc<MockTransport>, Arc<MemoryStore>, ConsentEngine) {
        let (transport, store, engine) = setup();
        transport.set_route(CONFIG_URL, Ok(fixtures::sample_json(version)));
        engine.initialize(CONFIG_URL).await.unwrap();
        (transport, store, engine)
    }

    #[tokio::test]
    async fn test_first_run_accept_all() {
        let (transport, _store, engine) = initialized("v1").await;
        transport.set_route(SAVE_URL, Ok(String::new()));

        assert!(engine.needs_consent().unwrap());
        assert!(!engine.has_user_consent().unwrap());

        engine.accept_all().await.unwrap();

        assert!(!engine.needs_consent().unwrap());
        assert!(engine.is_category_enabled("category_marketing").unwrap());
        assert_eq!(transport.request_count(SAVE_URL), 1);
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_save_keeps_local_state() {
        let (transport, store, engine) = initialized("v1").await;
        transport.set_offline(true);

        let prefs = Preferences::from_pairs(
            true,
            [("category_essential", true), ("category_analytics", false)],
        );
        let err = engine.save(prefs.clone()).await.unwrap_err();

        assert!(matches!(err, ConsentError::Network(NetworkError::Connection { .. })));
        assert_eq!(engine.user_preferences().unwrap(), Some(prefs));
        assert!(!engine.needs_consent().unwrap());

        let pending: Vec<PendingEvent> = store.get_json(StoreKey::PendingEvents).unwrap().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, EventKind::SavePreferences);

        transport.set_offline(false);
        transport.set_route(SAVE_URL, Ok(String::new()));
        let outcome = engine.retry_pending().await.unwrap();
        assert_eq!(outcome, RetryOutcome { delivered: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_new_version_asks_again() {
        let (transport, store, engine) = initialized("v1").await;
        transport.set_route(SAVE_URL, Ok(String::new()));
        engine.reject_all().await.unwrap();
        assert!(!engine.needs_consent().unwrap());

        transport.set_route(CONFIG_URL, Ok(fixtures::sample_json("v2")));
        engine.initialize(CONFIG_URL).await.unwrap();

        assert!(engine.needs_consent().unwrap());
        assert!(!engine.is_category_enabled("category_analytics").unwrap());
        assert!(engine.is_category_enabled("category_essential").unwrap());

        engine.accept_all().await.unwrap();
        assert!(!engine.needs_consent().unwrap());
        assert_eq!(
            store.get_string(StoreKey::ConsentedVersion).unwrap().as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_queries_before_initialize() {
        let (_transport, _store, engine) = setup();

        assert!(matches!(engine.needs_consent(), Err(ConsentError::NotInitialized)));
        assert!(matches!(engine.get_categories(), Err(ConsentError::NotInitialized)));
        assert!(matches!(
            engine.is_category_enabled("category_essential"),
            Err(ConsentError::NotInitialized)
        ));
        assert!(matches!(engine.essential_categories(), Err(ConsentError::NotInitialized)));
        assert!(matches!(
            engine.accept_all().await,
            Err(ConsentError::NotInitialized)
        ));
        assert!(engine.current_configuration().is_none());
        assert_eq!(engine.current_preferences().unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let (transport, _store, engine) = setup();

        for url in ["not a url", "ftp://cdn.example.com/config.json"] {
            let err = engine.initialize(url).await.unwrap_err();
            assert!(matches!(err, ConsentError::InvalidConfiguration(_)));
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initialize_leaves_engine_uninitialized() {
        let (transport, _store, engine) = setup();
        transport.set_route(
            CONFIG_URL,
            Err(NetworkError::Timeout {
                url: CONFIG_URL.to_string(),
            }),
        );

        let err = engine.initialize(CONFIG_URL).await.unwrap_err();

        assert!(matches!(err, ConsentError::Network(NetworkError::Timeout { .. })));
        assert_eq!(transport.request_count(CONFIG_URL), 5);
        assert!(engine.current_configuration().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_initialize_uses_cached_configuration() {
        let (transport, store, _engine) = initialized("v1").await;
        transport.set_offline(true);

        let engine = ConsentEngine::new(store.clone(), transport.clone(), RetryPolicy::default());
        let config = engine.initialize(CONFIG_URL).await.unwrap();

        assert_eq!(config.version, "v1");
        assert!(engine.needs_consent().unwrap());
    }

    #[tokio::test]
    async fn test_defaults_before_save() {
        let (_transport, _store, engine) = initialized("v1").await;

        let prefs = engine.get_categories().unwrap();
        assert!(!prefs.is_customised);
        assert!(engine.is_category_enabled("category_analytics").unwrap());
        assert!(!engine.is_category_enabled("category_marketing").unwrap());
        assert_eq!(
            engine.essential_categories().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["category_essential".to_string()]
        );
        assert_eq!(engine.user_preferences().unwrap(), None);
    }

    #[tokio::test]
    async fn test_banner_open_failure_is_swallowed() {
        let (transport, _store, engine) = initialized("v1").await;
        transport.set_offline(true);

        engine.track_banner_open().await.unwrap();
        assert_eq!(engine.pending_count().unwrap(), 1);

        transport.set_offline(false);
        transport.set_route(OPEN_URL, Ok(String::new()));
        engine.retry_pending().await.unwrap();
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_id_is_stable() {
        let (transport, store, engine) = initialized("v1").await;
        transport.set_route(OPEN_URL, Ok(String::new()));

        engine.track_banner_open().await.unwrap();
        engine.track_banner_open().await.unwrap();
        let stored = store.get_string(StoreKey::UniqueId).unwrap().unwrap();

        let requests = transport.requests();
        let opens: Vec<_> = requests.iter().filter(|r| r.url.starts_with(OPEN_URL)).collect();
        assert_eq!(opens.len(), 2);
        for request in opens {
            assert!(request.url.contains(&format!("uniqueId={}", stored)));
        }
    }

    #[tokio::test]
    async fn test_reset_forgets_everything() {
        let (transport, store, engine) = initialized("v1").await;
        transport.set_offline(true);
        let _ = engine.accept_all().await;
        engine.set_locale("fr").unwrap();

        engine.reset().await.unwrap();

        assert!(store.is_empty());
        assert!(engine.current_configuration().is_none());
        assert!(matches!(engine.needs_consent(), Err(ConsentError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let (transport, _store, engine) = initialized("v1").await;
        transport.set_route(SAVE_URL, Ok(String::new()));
        let mut changes = engine.subscribe();
        assert!(changes.borrow().is_none());

        engine.accept_all().await.unwrap();
        assert!(changes.has_changed().unwrap());
        let seen = changes.borrow_and_update().clone();
        assert!(seen.unwrap().is_customised);

        engine.reset().await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn test_locale_round_trip() {
        let (_transport, _store, engine) = setup();

        assert_eq!(engine.locale().unwrap(), None);
        engine.set_locale("de").unwrap();
        assert_eq!(engine.locale().unwrap().as_deref(), Some("de"));
    }

    #[tokio::test]
    async fn test_save_counts_in_metrics() {
        let (transport, _store, engine) = initialized("v1").await;
        transport.set_route(SAVE_URL, Ok(String::new()));

        engine.reject_all().await.unwrap();

        assert!(engine.metrics().to_prometheus().contains("consentr_saves_total 1"));
    }

    #[tokio::test]
    async fn test_customised_save_may_disable_always_on() {
        let (transport, _store, engine) = initialized("v1").await;
        transport.set_route(SAVE_URL, Ok(String::new()));

        let prefs = Preferences::from_pairs(
            true,
            [("category_essential", false), ("category_analytics", true)],
        );
        engine.save(prefs.clone()).await.unwrap();

        assert_eq!(engine.user_preferences().unwrap(), Some(prefs));
        assert!(!engine.is_category_enabled("category_essential").unwrap());
        assert!(engine
            .essential_categories()
            .unwrap()
            .contains("category_essential"));
    }

    /// Holds the next configuration fetch until released.
    struct GatedTransport {
        inner: MockTransport,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn request(&self, request: &HttpRequest) -> std::result::Result<String, NetworkError> {
            if request.url.starts_with(CONFIG_URL) && self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.request(request).await
        }
    }

    fn with_extra_category(version: &str, key: &str) -> String {
        let mut config = fixtures::sample(version);
        let details = config.layout.consent_layers.get_mut("details").unwrap();
        details.elements[0].consent_categories.push(CategoryDef {
            gtm_key: key.to_string(),
            translations: [(
                "en".to_string(),
                CategoryTranslation {
                    label: "New".to_string(),
                    description: None,
                },
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        });
        serde_json::to_string(&config).unwrap()
    }

    #[tokio::test]
    async fn test_accept_all_waits_for_reload() {
        let transport = Arc::new(GatedTransport {
            inner: MockTransport::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        });
        transport
            .inner
            .set_route(CONFIG_URL, Ok(fixtures::sample_json("v1")));
        transport.inner.set_route(SAVE_URL, Ok(String::new()));

        let engine = Arc::new(ConsentEngine::new(
            Arc::new(MemoryStore::new()),
            transport.clone(),
            RetryPolicy::default(),
        ));
        engine.initialize(CONFIG_URL).await.unwrap();

        transport.inner.set_route(
            CONFIG_URL,
            Ok(with_extra_category("v2", "category_new")),
        );
        transport.armed.store(true, Ordering::SeqCst);

        let reload = tokio::spawn({
            let engine = engine.clone();
            async move { engine.initialize(CONFIG_URL).await }
        });
        transport.entered.notified().await;

        let accept = tokio::spawn({
            let engine = engine.clone();
            async move { engine.accept_all().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        transport.release.notify_one();
        reload.await.unwrap().unwrap();
        accept.await.unwrap().unwrap();

        assert_eq!(engine.current_configuration().unwrap().version, "v2");
        assert!(!engine.needs_consent().unwrap());
        assert!(engine.is_category_enabled("category_new").unwrap());
    }
}
