//! Projection lifecycle: subscription, replay and health.
//!
//! Each registered projection is wrapped in a subscriber that counts what it
//! processed and remembers its last failure. A failing projection never
//! affects other projections or the command that produced the event.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rampart_core::bus::{EventBus, EventHandler, SubscriptionId};
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::projection::Projection;
use serde_json::Value;
use tracing::{error, info, instrument};

/// Health of one projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionStatus {
    /// Projection name.
    pub name: String,
    /// Whether the projection is subscribed to the bus.
    pub subscribed: bool,
    /// Events handled successfully.
    pub processed: u64,
    /// Events the projection failed on.
    pub failed: u64,
    /// The most recent failure, if any.
    pub last_error: Option<String>,
}

/// Counts from a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events handled successfully.
    pub processed: u64,
    /// Events the projection failed on.
    pub failed: u64,
    /// Events skipped by the projection's filter.
    pub skipped: u64,
}

#[derive(Default)]
struct Stats {
    processed: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Stats {
    fn reset(&self) {
        self.processed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        *self.last_error() = None;
    }

    // The guarded value is a plain diagnostic string, valid even after a
    // panicking writer.
    fn last_error(&self) -> MutexGuard<'_, Option<String>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bus subscriber feeding one projection.
struct ProjectionSubscriber {
    projection: Arc<dyn Projection>,
    stats: Arc<Stats>,
}

impl ProjectionSubscriber {
    async fn deliver(&self, event: &StoredEvent) -> Result<(), DomainError> {
        match self.projection.handle(event).await {
            Ok(()) => {
                self.stats.processed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                let message = e.to_string();
                *self.stats.last_error() = Some(message.clone());
                Err(DomainError::ProjectionFailed {
                    projection: self.projection.name().to_owned(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl EventHandler for ProjectionSubscriber {
    fn name(&self) -> &str {
        self.projection.name()
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.deliver(event).await
    }
}

struct Entry {
    subscriber: Arc<ProjectionSubscriber>,
    subscription: Option<SubscriptionId>,
}

/// Registers projections, wires them to an event bus and replays them.
pub struct ProjectionManager {
    bus: Arc<dyn EventBus>,
    entries: Mutex<Vec<Entry>>,
    running: AtomicBool,
}

impl ProjectionManager {
    /// Creates a manager over `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            entries: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Registers a projection. If the manager is running the projection is
    /// subscribed immediately.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if a projection with
    /// the same name exists.
    pub fn register(&self, projection: Arc<dyn Projection>) -> Result<(), DomainError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        let name = projection.name();
        if entries.iter().any(|e| e.subscriber.projection.name() == name) {
            return Err(DomainError::HandlerAlreadyRegistered(name.to_owned()));
        }
        let mut entry = Entry {
            subscriber: Arc::new(ProjectionSubscriber {
                projection,
                stats: Arc::new(Stats::default()),
            }),
            subscription: None,
        };
        if self.running.load(Ordering::SeqCst) {
            self.subscribe(&mut entry)?;
        }
        entries.push(entry);
        info!(projection = name, "registered projection");
        Ok(())
    }

    /// Subscribes every registered projection to the bus.
    ///
    /// # Errors
    ///
    /// Propagates bus subscription errors.
    pub fn start(&self) -> Result<(), DomainError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        for entry in entries.iter_mut() {
            self.subscribe(entry)?;
        }
        self.running.store(true, Ordering::SeqCst);
        info!(projections = entries.len(), "projections started");
        Ok(())
    }

    /// Unsubscribes every projection from the bus.
    ///
    /// # Errors
    ///
    /// Propagates bus errors.
    pub fn stop(&self) -> Result<(), DomainError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        for entry in entries.iter_mut() {
            if let Some(id) = entry.subscription.take() {
                self.bus.unsubscribe(id)?;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("projections stopped");
        Ok(())
    }

    /// Resets a projection and feeds it `events` in order. Counters restart
    /// from zero. Failures are logged and counted; replay continues.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unknown projection and
    /// propagates `reset` errors.
    #[instrument(skip(self, events), fields(events = events.len()))]
    pub async fn replay(&self, name: &str, events: &[StoredEvent]) -> Result<ReplayReport, DomainError> {
        let subscriber = self.find(name)?;
        let projection = Arc::clone(&subscriber.projection);
        let filter = projection.filter();

        projection.reset().await?;
        subscriber.stats.reset();

        let mut report = ReplayReport {
            processed: 0,
            failed: 0,
            skipped: 0,
        };
        for event in events {
            if !filter.matches(&event.event_type) {
                report.skipped += 1;
                continue;
            }
            match subscriber.deliver(event).await {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        error = %e,
                        aggregate_id = %event.aggregate_id,
                        version = event.version,
                        "projection failed during replay"
                    );
                }
            }
        }
        info!(
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "replay finished"
        );
        Ok(report)
    }

    /// Health of every registered projection, in registration order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if an internal lock is poisoned.
    pub fn status(&self) -> Result<Vec<ProjectionStatus>, DomainError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        entries
            .iter()
            .map(|entry| {
                let stats = &entry.subscriber.stats;
                Ok(ProjectionStatus {
                    name: entry.subscriber.projection.name().to_owned(),
                    subscribed: entry.subscription.is_some(),
                    processed: stats.processed.load(Ordering::SeqCst),
                    failed: stats.failed.load(Ordering::SeqCst),
                    last_error: stats.last_error().clone(),
                })
            })
            .collect()
    }

    /// Status as JSON, for health endpoints and logs.
    ///
    /// # Errors
    ///
    /// As [`ProjectionManager::status`].
    pub fn status_json(&self) -> Result<Value, DomainError> {
        let statuses = self.status()?;
        Ok(Value::Array(
            statuses
                .into_iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "subscribed": s.subscribed,
                        "processed": s.processed,
                        "failed": s.failed,
                        "last_error": s.last_error,
                    })
                })
                .collect(),
        ))
    }

    fn subscribe(&self, entry: &mut Entry) -> Result<(), DomainError> {
        if entry.subscription.is_none() {
            let handler: Arc<dyn EventHandler> = entry.subscriber.clone();
            let filter = entry.subscriber.projection.filter();
            entry.subscription = Some(self.bus.subscribe(filter, handler)?);
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Result<Arc<ProjectionSubscriber>, DomainError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        entries
            .iter()
            .find(|e| e.subscriber.projection.name() == name)
            .map(|e| Arc::clone(&e.subscriber))
            .ok_or_else(|| DomainError::Validation(format!("unknown projection {name}")))
    }
}

fn poisoned() -> DomainError {
    DomainError::Infrastructure("projection manager lock poisoned".into())
}

#[cfg(test)]
mod tests {
    use rampart_core::bus::EventFilter;
    use rampart_test_support::cargo_history;

    use super::*;
    use crate::event_bus::InMemoryEventBus;

    /// Sums loaded weight; refuses shipments heavier than `limit`.
    struct TonnageProjection {
        limit: u64,
        total: Mutex<u64>,
    }

    impl TonnageProjection {
        fn new(limit: u64) -> Self {
            Self {
                limit,
                total: Mutex::new(0),
            }
        }

        fn total(&self) -> u64 {
            *self.total.lock().unwrap()
        }
    }

    #[async_trait]
    impl Projection for TonnageProjection {
        fn name(&self) -> &'static str {
            "tonnage"
        }

        fn filter(&self) -> EventFilter {
            EventFilter::types(["ShipmentLoaded"])
        }

        async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
            let weight = event.payload["ShipmentLoaded"]["weight_kg"]
                .as_u64()
                .ok_or_else(|| DomainError::Serialization("missing weight_kg".into()))?;
            if weight > self.limit {
                return Err(DomainError::Validation(format!("{weight} kg over limit")));
            }
            *self.total.lock().unwrap() += weight;
            Ok(())
        }

        async fn reset(&self) -> Result<(), DomainError> {
            *self.total.lock().unwrap() = 0;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_started_projection_follows_the_bus() {
        // Arrange
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = ProjectionManager::new(bus.clone());
        let tonnage = Arc::new(TonnageProjection::new(1_000));
        manager.register(tonnage.clone()).unwrap();
        manager.start().unwrap();

        // Act
        bus.publish_all(&cargo_history("cargo-1", 3)).await.unwrap();

        // Assert
        assert_eq!(tonnage.total(), 60);
        let status = &manager.status().unwrap()[0];
        assert!(status.subscribed);
        assert_eq!(status.processed, 3);
        assert_eq!(status.failed, 0);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_isolated() {
        // Arrange
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = ProjectionManager::new(bus.clone());
        manager.register(Arc::new(TonnageProjection::new(15))).unwrap();
        manager.start().unwrap();

        // Act: shipments of 10, 20 and 30 kg.
        let published = bus.publish_all(&cargo_history("cargo-1", 3)).await;

        // Assert
        assert!(published.is_ok());
        let status = &manager.status().unwrap()[0];
        assert_eq!(status.processed, 1);
        assert_eq!(status.failed, 2);
        assert!(status.last_error.as_deref().unwrap().contains("30 kg over limit"));
    }

    #[tokio::test]
    async fn test_replay_resets_and_rebuilds() {
        // Arrange
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = ProjectionManager::new(bus);
        let tonnage = Arc::new(TonnageProjection::new(1_000));
        manager.register(tonnage.clone()).unwrap();
        let history = cargo_history("cargo-1", 4);

        // Act
        let first = manager.replay("tonnage", &history).await.unwrap();
        let second = manager.replay("tonnage", &history).await.unwrap();

        // Assert
        assert_eq!(tonnage.total(), 100);
        assert_eq!(first, second);
        assert_eq!(second.processed, 4);
        assert_eq!(second.skipped, 1);
        assert_eq!(manager.status().unwrap()[0].processed, 4);
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_and_duplicates_are_rejected() {
        let bus = Arc::new(InMemoryEventBus::new());
        let manager = ProjectionManager::new(bus.clone());
        let tonnage = Arc::new(TonnageProjection::new(1_000));
        manager.register(tonnage.clone()).unwrap();
        manager.start().unwrap();

        manager.stop().unwrap();
        bus.publish_all(&cargo_history("cargo-1", 1)).await.unwrap();
        let duplicate = manager.register(Arc::new(TonnageProjection::new(1)));

        assert_eq!(tonnage.total(), 0);
        assert_eq!(bus.subscriber_count().unwrap(), 0);
        assert!(!manager.status().unwrap()[0].subscribed);
        assert!(matches!(duplicate, Err(DomainError::HandlerAlreadyRegistered(_))));
        assert!(matches!(
            manager.replay("missing", &[]).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn test_reset_clears_last_error_after_writer_panicked() {
        // Arrange: poison the lock while an error is recorded.
        let stats = Arc::new(Stats::default());
        stats.failed.store(2, Ordering::SeqCst);
        *stats.last_error() = Some("30 kg over limit".into());
        let poisoner = Arc::clone(&stats);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.last_error.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(stats.last_error.is_poisoned());

        // Act
        stats.reset();

        // Assert
        assert_eq!(stats.failed.load(Ordering::SeqCst), 0);
        assert!(stats.last_error().is_none());
    }
}
