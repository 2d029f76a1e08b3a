//! Test event bus and handler doubles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rampart_core::bus::{EventBus, EventFilter, EventHandler, SubscriptionId};
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;

/// An event bus that records published events instead of delivering them.
/// Can be told to fail every publication.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<StoredEvent>>,
    fail_publish: bool,
    next_subscription: AtomicU64,
}

impl RecordingEventBus {
    /// Creates a bus that accepts every publication.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that rejects every publication with an infrastructure
    /// error.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_publish: true,
            ..Self::default()
        }
    }

    /// Returns the published events, in publication order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<StoredEvent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
        if self.fail_publish {
            return Err(DomainError::Infrastructure("broker unavailable".into()));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn subscribe(
        &self,
        _filter: EventFilter,
        _handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, DomainError> {
        Ok(SubscriptionId(
            self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    fn unsubscribe(&self, _id: SubscriptionId) -> Result<bool, DomainError> {
        Ok(true)
    }

    async fn start(&self) -> Result<(), DomainError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// An event handler that records what it receives and optionally fails on
/// one event type.
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    fail_on: Option<String>,
    received: Mutex<Vec<StoredEvent>>,
}

impl RecordingHandler {
    /// Creates a handler that accepts everything.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            fail_on: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Creates a handler that fails on events of `event_type`.
    #[must_use]
    pub fn failing_on(name: &str, event_type: &str) -> Self {
        Self {
            fail_on: Some(event_type.to_owned()),
            ..Self::new(name)
        }
    }

    /// Returns the events handled successfully, in delivery order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn received(&self) -> Vec<StoredEvent> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
        if self.fail_on.as_deref() == Some(event.event_type.as_str()) {
            return Err(DomainError::Infrastructure(format!(
                "{} refuses {}",
                self.name, event.event_type
            )));
        }
        self.received.lock().unwrap().push(event.clone());
        Ok(())
    }
}
