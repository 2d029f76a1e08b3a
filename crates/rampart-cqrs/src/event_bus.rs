//! In-process event bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rampart_core::bus::{EventBus, EventFilter, EventHandler, SubscriptionId};
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use tracing::{debug, error, info, instrument};

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    handler: Arc<dyn EventHandler>,
}

/// In-memory publish/subscribe bus.
///
/// - Delivers synchronously, in subscription order.
/// - A failing subscriber is logged and skipped; the rest still receive
///   the event.
/// - Created running; `stop` makes `publish` fail with
///   `DomainError::BusStopped` until `start` is called again.
pub struct InMemoryEventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl InMemoryEventBus {
    /// Creates a running bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while the bus delivers events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the subscriber lock is
    /// poisoned.
    pub fn subscriber_count(&self) -> Result<usize, DomainError> {
        Ok(self.subscribers.read().map_err(|_| poisoned())?.len())
    }

    fn matching(&self, event_type: &str) -> Result<Vec<Arc<dyn EventHandler>>, DomainError> {
        let subscribers = self.subscribers.read().map_err(|_| poisoned())?;
        Ok(subscribers
            .iter()
            .filter(|s| s.filter.matches(event_type))
            .map(|s| Arc::clone(&s.handler))
            .collect())
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::Infrastructure("event bus lock poisoned".into())
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    #[instrument(
        skip(self, event),
        fields(
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            version = event.version,
        )
    )]
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
        if !self.is_running() {
            return Err(DomainError::BusStopped);
        }
        // Handlers run outside the lock so they may subscribe or publish.
        let handlers = self.matching(&event.event_type)?;
        let mut failed = 0_usize;
        for handler in &handlers {
            if let Err(e) = handler.handle(event).await {
                failed += 1;
                error!(subscriber = handler.name(), error = %e, "subscriber failed to handle event");
            }
        }
        debug!(delivered = handlers.len() - failed, failed, "event published");
        Ok(())
    }

    fn subscribe(
        &self,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, DomainError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(subscription = %id, subscriber = handler.name(), ?filter, "subscribed");
        self.subscribers
            .write()
            .map_err(|_| poisoned())?
            .push(Subscriber {
                id,
                filter,
                handler,
            });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, DomainError> {
        let mut subscribers = self.subscribers.write().map_err(|_| poisoned())?;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        Ok(subscribers.len() < before)
    }

    async fn start(&self) -> Result<(), DomainError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("event bus started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), DomainError> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("event bus stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rampart_test_support::{RecordingHandler, cargo_history};

    use super::*;

    #[tokio::test]
    async fn test_fans_out_to_matching_subscribers_in_order() {
        // Arrange
        let bus = InMemoryEventBus::new();
        let all = Arc::new(RecordingHandler::new("all"));
        let created_only = Arc::new(RecordingHandler::new("created-only"));
        bus.subscribe(EventFilter::All, all.clone()).unwrap();
        bus.subscribe(EventFilter::types(["CargoCreated"]), created_only.clone())
            .unwrap();
        let history = cargo_history("cargo-1", 2);

        // Act
        bus.publish_all(&history).await.unwrap();

        // Assert
        let versions: Vec<i64> = all.received().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(created_only.received().len(), 1);
        assert_eq!(created_only.received()[0].event_type, "CargoCreated");
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let bus = InMemoryEventBus::new();
        let flaky = Arc::new(RecordingHandler::failing_on("flaky", "ShipmentLoaded"));
        let steady = Arc::new(RecordingHandler::new("steady"));
        bus.subscribe(EventFilter::All, flaky.clone()).unwrap();
        bus.subscribe(EventFilter::All, steady.clone()).unwrap();

        bus.publish_all(&cargo_history("cargo-1", 2)).await.unwrap();

        assert_eq!(flaky.received().len(), 1);
        assert_eq!(steady.received().len(), 3);
    }

    #[tokio::test]
    async fn test_stopped_bus_rejects_publication() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::new("h"));
        bus.subscribe(EventFilter::All, handler.clone()).unwrap();
        let event = cargo_history("cargo-1", 0).remove(0);

        bus.stop().await.unwrap();
        let stopped = bus.publish(&event).await;
        bus.start().await.unwrap();
        let restarted = bus.publish(&event).await;

        assert!(matches!(stopped, Err(DomainError::BusStopped)));
        assert!(restarted.is_ok());
        assert_eq!(handler.received().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InMemoryEventBus::new();
        let handler = Arc::new(RecordingHandler::new("h"));
        let id = bus.subscribe(EventFilter::All, handler.clone()).unwrap();

        assert!(bus.unsubscribe(id).unwrap());
        assert!(!bus.unsubscribe(id).unwrap());
        bus.publish_all(&cargo_history("cargo-1", 1)).await.unwrap();

        assert!(handler.received().is_empty());
        assert_eq!(bus.subscriber_count().unwrap(), 0);
    }
}
