//! Strategy selection per aggregate type.

use std::sync::Arc;

use rampart_core::aggregate::AggregateRoot;
use rampart_core::clock::Clock;
use rampart_core::config::{PersistenceConfig, PersistenceStrategy, RampartConfig};
use rampart_core::event_store::{EventStore, SnapshotStore};
use rampart_core::repository::Repository;
use rampart_core::snapshot::SnapshotPolicy;
use rampart_core::state::StateStore;
use sqlx::PgPool;
use tracing::debug;

use super::{EventSourcedRepository, HybridRepository, StateBasedRepository};
use crate::in_memory::{InMemoryEventStore, InMemoryStateStore};
use crate::pg_event_store::PgEventStore;

/// The backing stores repositories are built on.
#[derive(Clone)]
pub struct StoreSet {
    /// Event log.
    pub events: Arc<dyn EventStore>,
    /// Snapshot storage, if the backend has one.
    pub snapshots: Option<Arc<dyn SnapshotStore>>,
    /// Current-state storage.
    pub states: Arc<dyn StateStore>,
    /// Clock for snapshot and state timestamps.
    pub clock: Arc<dyn Clock>,
}

impl StoreSet {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(InMemoryEventStore::new());
        Self {
            events: events.clone(),
            snapshots: Some(events),
            states: Arc::new(InMemoryStateStore::new()),
            clock,
        }
    }

    /// `PostgreSQL` stores sharing one pool.
    #[must_use]
    pub fn postgres(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(PgEventStore::new(pool));
        Self {
            events: store.clone(),
            snapshots: Some(store.clone()),
            states: store,
            clock,
        }
    }
}

/// Builds the configured repository for each aggregate type.
#[derive(Clone)]
pub struct RepositoryFactory {
    persistence: PersistenceConfig,
    snapshot_policy: SnapshotPolicy,
    stores: StoreSet,
}

impl RepositoryFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(persistence: PersistenceConfig, snapshot_policy: SnapshotPolicy, stores: StoreSet) -> Self {
        Self {
            persistence,
            snapshot_policy,
            stores,
        }
    }

    /// Creates a factory from the runtime configuration.
    #[must_use]
    pub fn from_config(config: &RampartConfig, stores: StoreSet) -> Self {
        Self::new(config.persistence.clone(), config.snapshot_policy, stores)
    }

    /// Strategy configured for `A`.
    #[must_use]
    pub fn strategy_for<A: AggregateRoot>(&self) -> PersistenceStrategy {
        self.persistence.strategy_for(A::AGGREGATE_TYPE)
    }

    /// Builds the repository for `A`.
    #[must_use]
    pub fn build<A: AggregateRoot + 'static>(&self) -> Arc<dyn Repository<A>> {
        let strategy = self.strategy_for::<A>();
        debug!(aggregate_type = A::AGGREGATE_TYPE, %strategy, "building repository");
        let stores = &self.stores;
        match strategy {
            PersistenceStrategy::EventSourced => {
                let mut repo =
                    EventSourcedRepository::<A>::new(stores.events.clone(), stores.clock.clone());
                if let Some(snapshots) = &stores.snapshots {
                    repo = repo.with_snapshots(snapshots.clone(), self.snapshot_policy);
                }
                Arc::new(repo)
            }
            PersistenceStrategy::StateBased => Arc::new(StateBasedRepository::<A>::new(
                stores.states.clone(),
                stores.clock.clone(),
            )),
            PersistenceStrategy::Hybrid => Arc::new(HybridRepository::<A>::new(
                stores.events.clone(),
                stores.states.clone(),
                stores.clock.clone(),
            )),
        }
    }
}

/// Builds the repository configured for `A` in one call.
#[must_use]
pub fn build_repository<A: AggregateRoot + 'static>(
    config: &RampartConfig,
    stores: &StoreSet,
) -> Arc<dyn Repository<A>> {
    RepositoryFactory::from_config(config, stores.clone()).build::<A>()
}
