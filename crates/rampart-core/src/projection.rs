//! Projection abstraction.

use async_trait::async_trait;

use crate::bus::EventFilter;
use crate::error::DomainError;
use crate::event::StoredEvent;

/// A consumer that maintains a denormalized read model from events.
///
/// Projections are eventually consistent with the event store and must
/// tolerate redelivery: handling the same event twice leaves the read model
/// unchanged.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Unique projection name.
    fn name(&self) -> &'static str;

    /// Events this projection subscribes to.
    fn filter(&self) -> EventFilter {
        EventFilter::All
    }

    /// Updates the read model for one event.
    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError>;

    /// Discards the read model ahead of a replay.
    async fn reset(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
