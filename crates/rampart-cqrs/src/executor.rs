//! Reusable body of an aggregate command handler.
//!
//! Load (or start) the aggregate, run the business method, save with the
//! version the aggregate was loaded at, publish what was committed, clear.
//! Publication happens strictly after persistence; a bus failure is logged
//! and never undoes or fails the command, since the events are already
//! durable and can be replayed. Once the save succeeds, delivery completes
//! even if the caller stops waiting.

use std::sync::Arc;

use rampart_core::aggregate::{AggregateRoot, EventContext};
use rampart_core::bus::EventBus;
use rampart_core::clock::Clock;
use rampart_core::command::{Command, CommandOutcome};
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::repository::Repository;
use tracing::{Instrument, debug, instrument, warn};

/// Executes commands against aggregates of type `A`.
pub struct AggregateCommandExecutor<A: AggregateRoot> {
    repository: Arc<dyn Repository<A>>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl<A: AggregateRoot> Clone for AggregateCommandExecutor<A> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<A: AggregateRoot + 'static> AggregateCommandExecutor<A> {
    /// Creates an executor.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository<A>>, bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            bus,
            clock,
        }
    }

    /// Returns the repository commands are saved through.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository<A>> {
        &self.repository
    }

    /// Starts a new aggregate with the command's id and runs `decide` on it.
    ///
    /// # Errors
    ///
    /// Returns the business method's error, or
    /// `DomainError::ConcurrencyConflict` if the aggregate already exists.
    #[instrument(
        skip(self, command, decide),
        fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %command.aggregate_id()),
        err
    )]
    pub async fn create<C, F>(&self, command: &C, decide: F) -> Result<CommandOutcome, DomainError>
    where
        C: Command,
        F: FnOnce(&mut A, &EventContext<'_>) -> Result<(), DomainError> + Send,
    {
        let mut aggregate = A::empty(command.aggregate_id().clone());
        self.decide(&mut aggregate, command, decide)?;
        self.commit(aggregate).await
    }

    /// Loads the command's aggregate and runs `decide` on it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for an unknown aggregate,
    /// the business method's error, or `DomainError::ConcurrencyConflict`
    /// if another writer saved first.
    #[instrument(
        skip(self, command, decide),
        fields(aggregate_type = A::AGGREGATE_TYPE, aggregate_id = %command.aggregate_id()),
        err
    )]
    pub async fn update<C, F>(&self, command: &C, decide: F) -> Result<CommandOutcome, DomainError>
    where
        C: Command,
        F: FnOnce(&mut A, &EventContext<'_>) -> Result<(), DomainError> + Send,
    {
        let mut aggregate = self.repository.get_by_id(command.aggregate_id()).await?;
        self.decide(&mut aggregate, command, decide)?;
        self.commit(aggregate).await
    }

    fn decide<C, F>(&self, aggregate: &mut A, command: &C, decide: F) -> Result<(), DomainError>
    where
        C: Command,
        F: FnOnce(&mut A, &EventContext<'_>) -> Result<(), DomainError>,
    {
        let ctx = EventContext::new(self.clock.as_ref())
            .with_issuer(command.issuer().cloned())
            .with_correlation_id(command.correlation_id());
        decide(aggregate, &ctx)
    }

    async fn commit(&self, mut aggregate: A) -> Result<CommandOutcome, DomainError> {
        if aggregate.changes().is_empty() {
            debug!("command produced no events");
            return Ok(CommandOutcome::new(
                aggregate.aggregate_id().clone(),
                aggregate.current_version(),
                Vec::new(),
            ));
        }

        let events = self
            .repository
            .save(&aggregate, aggregate.original_version())
            .await?;
        self.publish(&events).await;
        aggregate.clear_changes();

        Ok(CommandOutcome::new(
            aggregate.aggregate_id().clone(),
            aggregate.current_version(),
            events,
        ))
    }

    // Delivery runs on its own task so that a caller dropping this future
    // (a dispatch deadline, a client disconnect) cannot strand committed
    // events unpublished.
    async fn publish(&self, events: &[StoredEvent]) {
        let bus = Arc::clone(&self.bus);
        let batch = events.to_vec();
        let delivery = tokio::spawn(
            async move { bus.publish_all(&batch).await }.in_current_span(),
        );
        match delivery.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                error = %e,
                events = events.len(),
                "publishing committed events failed; projections will lag until replay"
            ),
            Err(e) => warn!(
                error = %e,
                events = events.len(),
                "publishing task did not complete; projections will lag until replay"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::aggregate::AggregateId;
    use rampart_event_store::InMemoryEventStore;
    use rampart_event_store::repository::EventSourcedRepository;
    use rampart_test_support::{Cargo, FixedClock, RecordingEventBus};
    use uuid::Uuid;

    use super::*;

    #[derive(Debug)]
    struct LoadCargo {
        command_id: Uuid,
        aggregate_id: AggregateId,
    }

    impl LoadCargo {
        fn new(id: &str) -> Self {
            Self {
                command_id: Uuid::new_v4(),
                aggregate_id: AggregateId::from(id),
            }
        }
    }

    impl Command for LoadCargo {
        const COMMAND_TYPE: &'static str = "LoadCargo";

        fn command_id(&self) -> Uuid {
            self.command_id
        }

        fn aggregate_id(&self) -> &AggregateId {
            &self.aggregate_id
        }
    }

    fn executor(bus: Arc<RecordingEventBus>) -> AggregateCommandExecutor<Cargo> {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
        let repository = Arc::new(EventSourcedRepository::<Cargo>::new(
            Arc::new(InMemoryEventStore::new()),
            clock.clone(),
        ));
        AggregateCommandExecutor::new(repository, bus, clock)
    }

    #[tokio::test]
    async fn test_create_then_update_saves_and_publishes_in_order() {
        // Arrange
        let bus = Arc::new(RecordingEventBus::new());
        let executor = executor(bus.clone());
        let command = LoadCargo::new("cargo-1");

        // Act
        let created = executor
            .create(&command, |cargo: &mut Cargo, ctx| {
                *cargo = Cargo::create(cargo.aggregate_id().clone(), "Oslo", "Lagos", ctx)?;
                Ok(())
            })
            .await
            .unwrap();
        let updated = executor
            .update(&command, |cargo: &mut Cargo, ctx| {
                cargo.load_shipment(5, ctx)?;
                cargo.load_shipment(6, ctx)
            })
            .await
            .unwrap();

        // Assert
        assert_eq!(created.version, 1);
        assert_eq!(updated.version, 3);
        assert_eq!(updated.events.len(), 2);
        let versions: Vec<i64> = bus.published().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(
            bus.published()
                .iter()
                .all(|e| e.correlation_id == Some(command.command_id))
        );
    }

    #[tokio::test]
    async fn test_no_changes_saves_and_publishes_nothing() {
        let bus = Arc::new(RecordingEventBus::new());
        let executor = executor(bus.clone());
        let command = LoadCargo::new("cargo-1");
        executor
            .create(&command, |cargo: &mut Cargo, ctx| {
                *cargo = Cargo::create(cargo.aggregate_id().clone(), "Oslo", "Lagos", ctx)?;
                Ok(())
            })
            .await
            .unwrap();

        let outcome = executor.update(&command, |_, _| Ok(())).await.unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.version, 1);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_the_command() {
        // Arrange
        let executor = executor(Arc::new(RecordingEventBus::failing()));
        let command = LoadCargo::new("cargo-1");

        // Act
        let outcome = executor
            .create(&command, |cargo: &mut Cargo, ctx| {
                *cargo = Cargo::create(cargo.aggregate_id().clone(), "Oslo", "Lagos", ctx)?;
                Ok(())
            })
            .await;

        // Assert
        assert_eq!(outcome.unwrap().version, 1);
        assert_eq!(
            executor
                .repository()
                .get_version(&AggregateId::from("cargo-1"))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_business_error_persists_nothing() {
        let bus = Arc::new(RecordingEventBus::new());
        let executor = executor(bus.clone());

        let result = executor
            .create(&LoadCargo::new("cargo-1"), |cargo: &mut Cargo, ctx| {
                cargo.load_shipment(5, ctx)
            })
            .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(bus.published().is_empty());
        assert!(
            !executor
                .repository()
                .exists(&AggregateId::from("cargo-1"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_of_unknown_aggregate_is_not_found() {
        let executor = executor(Arc::new(RecordingEventBus::new()));

        let result = executor
            .update(&LoadCargo::new("missing"), |cargo: &mut Cargo, ctx| {
                cargo.load_shipment(1, ctx)
            })
            .await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }

    struct SlowBus {
        delay: std::time::Duration,
        inner: RecordingEventBus,
    }

    #[async_trait::async_trait]
    impl EventBus for SlowBus {
        async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
            tokio::time::sleep(self.delay).await;
            self.inner.publish(event).await
        }

        fn subscribe(
            &self,
            filter: rampart_core::bus::EventFilter,
            handler: Arc<dyn rampart_core::bus::EventHandler>,
        ) -> Result<rampart_core::bus::SubscriptionId, DomainError> {
            self.inner.subscribe(filter, handler)
        }

        fn unsubscribe(&self, id: rampart_core::bus::SubscriptionId) -> Result<bool, DomainError> {
            self.inner.unsubscribe(id)
        }

        async fn start(&self) -> Result<(), DomainError> {
            self.inner.start().await
        }

        async fn stop(&self) -> Result<(), DomainError> {
            self.inner.stop().await
        }
    }

    #[tokio::test]
    async fn test_committed_events_are_published_when_caller_gives_up() {
        // Arrange
        let bus = Arc::new(SlowBus {
            delay: std::time::Duration::from_millis(50),
            inner: RecordingEventBus::new(),
        });
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
        let repository = Arc::new(EventSourcedRepository::<Cargo>::new(
            Arc::new(InMemoryEventStore::new()),
            clock.clone(),
        ));
        let executor = AggregateCommandExecutor::new(repository, bus.clone(), clock);
        let command = LoadCargo::new("cargo-1");

        // Act: stop waiting while delivery is still in flight.
        let gave_up = tokio::time::timeout(
            std::time::Duration::from_millis(5),
            executor.create(&command, |cargo: &mut Cargo, ctx| {
                *cargo = Cargo::create(cargo.aggregate_id().clone(), "Oslo", "Lagos", ctx)?;
                Ok(())
            }),
        )
        .await;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // Assert
        assert!(gave_up.is_err());
        assert_eq!(
            executor
                .repository()
                .get_version(&AggregateId::from("cargo-1"))
                .await
                .unwrap(),
            1
        );
        let published = bus.inner.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, "CargoCreated");
    }
}
