use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ConsentError;
use crate::observability::MetricsRegistry;
use crate::storage::{PersistentStore, StorageError, StoreExt, StoreKey};
use crate::transport::Transport;

use super::event::PendingEvent;

/// Counts from one replay of the pending list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Durable at-least-once delivery queue.
///
/// Undelivered events are appended to an ordered list under
/// [`StoreKey::PendingEvents`] and replayed in enqueue order. An event is
/// removed only after the backend acknowledged it, so a crash between
/// delivery and removal can redeliver it. Methods take `&mut self` because
/// every read-modify-write of the list must be serialized.
pub struct EventOutbox {
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistentStore>,
    metrics: Arc<MetricsRegistry>,
}

impl EventOutbox {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn PersistentStore>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        EventOutbox {
            transport,
            store,
            metrics,
        }
    }

    /// Try to deliver `event` now; queue it on failure.
    ///
    /// A delivery failure is returned as [`ConsentError::Network`] after the
    /// event is safely queued. A failure to queue is a storage error.
    pub async fn enqueue_and_attempt(&mut self, event: PendingEvent) -> Result<(), ConsentError> {
        match self.transport.request(&event.request).await {
            Ok(_) => {
                self.metrics.record_delivery(true);
                debug!(event_id = %event.id, kind = %event.kind, "Event delivered");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_delivery(false);
                warn!(event_id = %event.id, kind = %event.kind, error = %e, "Event delivery failed, queued for retry");
                self.append(event)?;
                Err(e.into())
            }
        }
    }

    /// Replay every pending event in enqueue order.
    ///
    /// Delivered events are removed one at a time; failed events stay in
    /// their original relative order for the next cycle.
    pub async fn retry_pending(&mut self) -> Result<RetryOutcome, StorageError> {
        let mut remaining: VecDeque<PendingEvent> = self.pending()?.into();
        let mut outcome = RetryOutcome::default();

        if remaining.is_empty() {
            return Ok(outcome);
        }

        self.metrics.record_retry_cycle();
        let mut kept: Vec<PendingEvent> = Vec::new();

        while let Some(event) = remaining.pop_front() {
            match self.transport.request(&event.request).await {
                Ok(_) => {
                    outcome.delivered += 1;
                    self.metrics.record_delivery(true);
                    self.persist(kept.iter().chain(remaining.iter()))?;
                }
                Err(e) => {
                    outcome.failed += 1;
                    debug!(event_id = %event.id, kind = %event.kind, error = %e, "Pending event still undeliverable");
                    kept.push(event);
                }
            }
        }

        info!(
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Pending events replayed"
        );

        Ok(outcome)
    }

    /// Events awaiting delivery, oldest first.
    pub fn pending(&self) -> Result<Vec<PendingEvent>, StorageError> {
        Ok(self
            .store
            .get_json(StoreKey::PendingEvents)?
            .unwrap_or_default())
    }

    pub fn pending_count(&self) -> Result<usize, StorageError> {
        Ok(self.pending()?.len())
    }

    fn append(&mut self, event: PendingEvent) -> Result<(), StorageError> {
        let mut pending = self.pending()?;
        pending.push(event);
        self.store.put_json(StoreKey::PendingEvents, &pending)
    }

    fn persist<'a>(
        &mut self,
        events: impl Iterator<Item = &'a PendingEvent>,
    ) -> Result<(), StorageError> {
        let events: Vec<&PendingEvent> = events.collect();

        if events.is_empty() {
            self.store.remove(StoreKey::PendingEvents.as_str())
        } else {
            self.store.put_json(StoreKey::PendingEvents, &events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::fixtures;
    use crate::domain::{EventIdentity, Preferences, UniqueId};
    use crate::outbox::EventKind;
    use crate::storage::MemoryStore;
    use crate::transport::{MockTransport, NetworkError};

    const SAVE_URL: &str = "https://privacy.example.com/api/v1/save_preferences";
    const OPEN_URL: &str = "https://privacy.example.com/api/v1/save_open";

    fn setup() -> (Arc<MockTransport>, Arc<MemoryStore>, EventOutbox) {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let outbox = EventOutbox::new(
            transport.clone(),
            store.clone(),
            Arc::new(MetricsRegistry::new()),
        );
        (transport, store, outbox)
    }

    fn identity() -> EventIdentity {
        EventIdentity::fresh_session(UniqueId("uid-1".to_string()))
    }

    fn save_event(key: &str) -> PendingEvent {
        let prefs = Preferences::from_pairs(true, [(key, true)]);
        PendingEvent::save_preferences(&fixtures::sample("v1"), &prefs, &identity()).unwrap()
    }

    fn open_event() -> PendingEvent {
        PendingEvent::banner_open(&fixtures::sample("v1"), &identity()).unwrap()
    }

    #[tokio::test]
    async fn test_delivered_event_is_not_queued() {
        let (transport, _store, mut outbox) = setup();
        transport.set_route(SAVE_URL, Ok(String::new()));

        outbox.enqueue_and_attempt(save_event("a")).await.unwrap();

        assert_eq!(outbox.pending_count().unwrap(), 0);
        assert_eq!(transport.request_count(SAVE_URL), 1);
    }

    #[tokio::test]
    async fn test_failed_event_is_queued_and_reported() {
        let (transport, _store, mut outbox) = setup();
        transport.set_offline(true);

        let event = save_event("a");
        let err = outbox.enqueue_and_attempt(event.clone()).await.unwrap_err();

        assert!(matches!(err, ConsentError::Network(_)));
        assert_eq!(outbox.pending().unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_queue_failure_is_storage_error() {
        let (transport, store, mut outbox) = setup();
        transport.set_offline(true);
        store.set_fail_writes(true);

        let err = outbox.enqueue_and_attempt(save_event("a")).await.unwrap_err();
        assert!(matches!(err, ConsentError::Storage(_)));
    }

    #[tokio::test]
    async fn test_retry_empty_is_noop() {
        let (transport, store, mut outbox) = setup();

        let outcome = outbox.retry_pending().await.unwrap();

        assert_eq!(outcome, RetryOutcome { delivered: 0, failed: 0 });
        assert!(store.is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_retry_delivers_both_kinds() {
        let (transport, store, mut outbox) = setup();
        transport.set_offline(true);
        let _ = outbox.enqueue_and_attempt(save_event("a")).await;
        let _ = outbox.enqueue_and_attempt(open_event()).await;
        assert_eq!(outbox.pending_count().unwrap(), 2);

        transport.set_offline(false);
        transport.set_route(SAVE_URL, Ok(String::new()));
        transport.set_route(OPEN_URL, Ok(String::new()));

        let outcome = outbox.retry_pending().await.unwrap();

        assert_eq!(outcome, RetryOutcome { delivered: 2, failed: 0 });
        assert_eq!(outbox.pending_count().unwrap(), 0);
        assert!(store.get(StoreKey::PendingEvents.as_str()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_keeps_failures_in_order() {
        let (transport, _store, mut outbox) = setup();
        transport.set_offline(true);

        let first = save_event("first");
        let open = open_event();
        let last = save_event("last");
        for event in [first.clone(), open.clone(), last.clone()] {
            let _ = outbox.enqueue_and_attempt(event).await;
        }

        transport.set_offline(false);
        transport.set_route(OPEN_URL, Ok(String::new()));

        let outcome = outbox.retry_pending().await.unwrap();

        assert_eq!(outcome, RetryOutcome { delivered: 1, failed: 2 });
        assert_eq!(outbox.pending().unwrap(), vec![first, last]);

        let replayed: Vec<_> = transport
            .requests()
            .into_iter()
            .skip(3)
            .map(|r| r.url.starts_with(OPEN_URL))
            .collect();
        assert_eq!(replayed, vec![false, true, false]);
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let (transport, _store, mut outbox) = setup();
        transport.set_offline(true);

        let event = open_event();
        let _ = outbox.enqueue_and_attempt(event.clone()).await;
        let _ = outbox.enqueue_and_attempt(event.clone()).await;

        let pending = outbox.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|e| e.kind == EventKind::BannerOpen));
    }

    #[tokio::test]
    async fn test_pending_survives_new_outbox() {
        let (transport, store, mut outbox) = setup();
        transport.set_offline(true);
        let _ = outbox.enqueue_and_attempt(save_event("a")).await;
        drop(outbox);

        transport.set_offline(false);
        transport.set_route(SAVE_URL, Ok(String::new()));
        let mut reopened = EventOutbox::new(
            transport.clone(),
            store.clone(),
            Arc::new(MetricsRegistry::new()),
        );

        let outcome = reopened.retry_pending().await.unwrap();
        assert_eq!(outcome.delivered, 1);
    }

    #[tokio::test]
    async fn test_unexpected_status_counts_as_failure() {
        let (transport, _store, mut outbox) = setup();
        transport.set_route(
            SAVE_URL,
            Err(NetworkError::Status {
                url: SAVE_URL.to_string(),
                status: 503,
            }),
        );

        let _ = outbox.enqueue_and_attempt(save_event("a")).await;
        let outcome = outbox.retry_pending().await.unwrap();

        assert_eq!(outcome, RetryOutcome { delivered: 0, failed: 1 });
        assert_eq!(outbox.pending_count().unwrap(), 1);
    }
}
