//! Event bus abstraction.
//!
//! The bus fans committed events out to subscribers after they have been
//! stored. It is not the system of record: a lost publication can always be
//! recovered from the event store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::StoredEvent;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which events a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event (wildcard).
    All,
    /// Only events whose type is listed.
    Types(Vec<String>),
}

impl EventFilter {
    /// Builds a filter from a list of event type names.
    #[must_use]
    pub fn types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Types(types.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if an event of `event_type` passes the filter.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Types(types) => types.iter().any(|t| t == event_type),
        }
    }
}

/// A consumer of published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one event.
    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError>;
}

/// Publish/subscribe fan-out of committed events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Delivers an event to every matching subscriber. A failing subscriber
    /// does not prevent delivery to the others.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::BusStopped` when the bus is not running.
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError>;

    /// Publishes events one by one, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first publication error.
    async fn publish_all(&self, events: &[StoredEvent]) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// Registers a handler for events passing `filter`.
    fn subscribe(
        &self,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, DomainError>;

    /// Removes a subscription. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, DomainError>;

    /// Starts delivering events.
    async fn start(&self) -> Result<(), DomainError>;

    /// Stops delivering events.
    async fn stop(&self) -> Result<(), DomainError>;
}
