//! Repository strategies.
//!
//! All three implement [`rampart_core::repository::Repository`] with the
//! same contract; [`factory`] picks one per aggregate type from
//! configuration.

pub mod event_sourced;
pub mod factory;
pub mod hybrid;
pub mod state_based;

pub use event_sourced::EventSourcedRepository;
pub use factory::{RepositoryFactory, StoreSet, build_repository};
pub use hybrid::{ConsistencyReport, HybridRepository};
pub use state_based::StateBasedRepository;

use rampart_core::aggregate::{AggregateId, AggregateRoot};
use rampart_core::error::DomainError;
use rampart_core::event_store::EventStore;

/// Last event version of `id`'s stream, or 0 when the stream is missing or
/// belongs to another aggregate type.
///
/// The type check reads only the head event, which compaction never
/// removes.
pub(crate) async fn stream_version<A: AggregateRoot>(
    events: &dyn EventStore,
    id: &AggregateId,
) -> Result<i64, DomainError> {
    let last = events.get_last_event_version(id).await?;
    if last == 0 {
        return Ok(0);
    }
    match events.get_event_history(id, A::AGGREGATE_TYPE, last).await {
        Ok(_) => Ok(last),
        Err(DomainError::AggregateNotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}
