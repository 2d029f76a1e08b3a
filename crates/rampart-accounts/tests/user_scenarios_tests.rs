//! End-to-end scenarios over the accounts context: command dispatch,
//! persistence, publication, projection and queries.

use std::sync::Arc;

use rampart_accounts::AccountsContext;
use rampart_accounts::application::projections::UserProjection;
use rampart_accounts::application::query_handlers::{GetUser, ListUsers};
use rampart_accounts::domain::aggregates::{User, UserStatus};
use rampart_accounts::domain::commands::{ChangeEmail, CreateUser, DeleteUser};
use rampart_core::aggregate::{AggregateId, AggregateRoot, EventContext};
use rampart_core::bus::EventBus;
use rampart_core::clock::Clock;
use rampart_core::config::{PersistenceConfig, PersistenceStrategy, RampartConfig};
use rampart_core::error::DomainError;
use rampart_core::event_store::EventStore;
use rampart_core::query::{Pagination, Sorting};
use rampart_core::repository::Repository;
use rampart_cqrs::{
    CommandDispatcher, InMemoryEventBus, InMemoryReadStore, ProjectionManager, QueryDispatcher,
    retry_on_conflict,
};
use rampart_event_store::repository::{EventSourcedRepository, StoreSet, build_repository};
use rampart_test_support::{FailingEventStore, FixedClock, RecordingEventBus};

struct App {
    commands: CommandDispatcher,
    queries: QueryDispatcher,
    projections: ProjectionManager,
    stores: StoreSet,
}

fn app(strategy: PersistenceStrategy) -> App {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
    let stores = StoreSet::in_memory(clock.clone());
    let config = RampartConfig {
        persistence: PersistenceConfig::uniform(PersistenceStrategy::EventSourced)
            .with_override("User", strategy),
        ..RampartConfig::default()
    };
    let bus = Arc::new(InMemoryEventBus::new());
    let context = AccountsContext::new(
        build_repository::<User>(&config, &stores),
        bus.clone(),
        Arc::new(InMemoryReadStore::new()),
        clock,
    );
    let mut commands = CommandDispatcher::new().with_timeout(config.dispatch_timeout);
    let mut queries = QueryDispatcher::new();
    let projections = ProjectionManager::new(bus);
    context
        .register(&mut commands, &mut queries, &projections)
        .unwrap();
    projections.start().unwrap();
    App {
        commands,
        queries,
        projections,
        stores,
    }
}

// --- validation ---

#[tokio::test]
async fn test_create_user_with_empty_email_never_touches_the_store() {
    // Arrange: a store that fails every call proves it is never reached.
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
    let bus = Arc::new(RecordingEventBus::new());
    let repository = Arc::new(EventSourcedRepository::<User>::new(
        Arc::new(FailingEventStore),
        clock.clone(),
    ));
    let context = AccountsContext::new(
        repository,
        bus.clone(),
        Arc::new(InMemoryReadStore::new()),
        clock,
    );
    let mut commands = CommandDispatcher::new();
    context
        .register(
            &mut commands,
            &mut QueryDispatcher::new(),
            &ProjectionManager::new(bus.clone()),
        )
        .unwrap();

    // Act
    let result = commands
        .dispatch(&CreateUser::new("user-1", "", "Ada"))
        .await;

    // Assert
    assert!(matches!(result.error(), Some(DomainError::Validation(_))));
    assert!(result.events().is_empty());
    assert!(bus.published().is_empty());
}

// --- optimistic concurrency ---

#[tokio::test]
async fn test_stale_writer_on_user_42_conflicts_for_every_strategy() {
    for strategy in [
        PersistenceStrategy::EventSourced,
        PersistenceStrategy::StateBased,
        PersistenceStrategy::Hybrid,
    ] {
        // Arrange: bring user-42 to version 3.
        let app = app(strategy);
        let user_id = AggregateId::from("user-42");
        for command in [
            app.commands
                .dispatch(&CreateUser::new("user-42", "ada@example.com", "Ada"))
                .await,
            app.commands
                .dispatch(&ChangeEmail::new("user-42", "ada@lovelace.dev"))
                .await,
            app.commands
                .dispatch(&ChangeEmail::new("user-42", "ada@engine.org"))
                .await,
        ] {
            assert!(command.is_success(), "{strategy}: {:?}", command.error());
        }
        let config = RampartConfig {
            persistence: PersistenceConfig::uniform(strategy),
            ..RampartConfig::default()
        };
        let repository = build_repository::<User>(&config, &app.stores);
        let clock = FixedClock::default();
        let ctx = EventContext::new(&clock);
        let mut writer_a = repository.get_by_id(&user_id).await.unwrap();
        let mut writer_b = repository.get_by_id(&user_id).await.unwrap();
        assert_eq!(writer_a.original_version(), 3, "{strategy}");

        // Act
        writer_a.change_email("a@example.com", &ctx).unwrap();
        let saved_a = repository.save(&writer_a, 3).await;
        writer_b.change_email("b@example.com", &ctx).unwrap();
        let saved_b = repository.save(&writer_b, 3).await;

        // Assert
        assert_eq!(saved_a.unwrap()[0].version, 4, "{strategy}");
        match saved_b {
            Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            }) => {
                assert_eq!(aggregate_id, user_id);
                assert_eq!(expected, 3, "{strategy}");
                assert_eq!(actual, 4, "{strategy}");
            }
            other => panic!("{strategy}: expected ConcurrencyConflict, got {other:?}"),
        }
        let current = repository.get_by_id(&user_id).await.unwrap();
        assert_eq!(current.state().email, "a@example.com", "{strategy}");
    }
}

#[tokio::test]
async fn test_conflicting_writer_succeeds_after_retry() {
    // Arrange
    let app = app(PersistenceStrategy::EventSourced);
    app.commands
        .dispatch(&CreateUser::new("user-42", "ada@example.com", "Ada"))
        .await
        .into_result()
        .unwrap();
    let repository = build_repository::<User>(&RampartConfig::default(), &app.stores);
    let stale = repository.get_by_id(&AggregateId::from("user-42")).await.unwrap();
    app.commands
        .dispatch(&ChangeEmail::new("user-42", "ada@lovelace.dev"))
        .await
        .into_result()
        .unwrap();

    // Act: the first attempt decides on the stale copy, later ones reload.
    let clock = FixedClock::default();
    let outcome = retry_on_conflict(3, |attempt| {
        let repository = Arc::clone(&repository);
        let stale = stale.clone();
        let clock = clock.clone();
        async move {
            let mut user = if attempt == 1 {
                stale
            } else {
                repository.get_by_id(&AggregateId::from("user-42")).await?
            };
            user.change_email("ada@engine.org", &EventContext::new(&clock))?;
            repository.save(&user, user.original_version()).await
        }
    })
    .await;

    // Assert
    assert_eq!(outcome.unwrap()[0].version, 3);
}

// --- paging ---

#[tokio::test]
async fn test_second_page_of_ten_over_25_users() {
    // Arrange
    let app = app(PersistenceStrategy::StateBased);
    for n in 1..=25 {
        let result = app
            .commands
            .dispatch(&CreateUser::new(
                format!("user-{n:02}"),
                &format!("user{n}@example.com"),
                &format!("User {n}"),
            ))
            .await;
        assert!(result.is_success());
    }

    // Act
    let page = app
        .queries
        .dispatch(
            &ListUsers::new()
                .page(Pagination::new(2, 10).unwrap())
                .sorted_by(Sorting::asc("id")),
        )
        .await
        .unwrap()
        .data;

    // Assert
    let ids: Vec<String> = page.items.iter().map(|v| v.id.clone()).collect();
    let expected: Vec<String> = (11..=20).map(|n| format!("user-{n:02}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(page.total_count, 25);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.page, 2);
}

// --- command to query ---

#[tokio::test]
async fn test_commands_flow_through_to_queries_and_replay() {
    // Arrange
    let app = app(PersistenceStrategy::Hybrid);

    // Act
    let created = app
        .commands
        .dispatch(&CreateUser::new("user-7", "grace@example.com", "Grace"))
        .await;
    app.commands
        .dispatch(&ChangeEmail::new("user-7", "grace@navy.mil"))
        .await
        .into_result()
        .unwrap();
    app.commands
        .dispatch(&CreateUser::new("user-8", "alan@example.com", "Alan"))
        .await
        .into_result()
        .unwrap();
    app.commands
        .dispatch(&DeleteUser::new("user-8"))
        .await
        .into_result()
        .unwrap();

    // Assert: read side.
    assert_eq!(created.version(), Some(1));
    let view = app.queries.dispatch(&GetUser::new("user-7")).await.unwrap().data;
    assert_eq!(view.email, "grace@navy.mil");
    assert_eq!(view.version, 2);
    let listed = app.queries.dispatch(&ListUsers::new()).await.unwrap().data;
    assert_eq!(listed.total_count, 1);
    let deleted = app
        .queries
        .dispatch(&ListUsers::new().with_status(UserStatus::Deleted))
        .await
        .unwrap()
        .data;
    assert_eq!(deleted.items[0].id, "user-8");
    let status = &app.projections.status().unwrap()[0];
    assert_eq!(status.name, UserProjection::NAME);
    assert_eq!(status.processed, 4);
    assert_eq!(status.failed, 0);

    // Assert: replaying the log rebuilds the same view.
    let mut history = app
        .stores
        .events
        .get_event_history(&AggregateId::from("user-7"), "User", 1)
        .await
        .unwrap();
    history.extend(
        app.stores
            .events
            .get_event_history(&AggregateId::from("user-8"), "User", 1)
            .await
            .unwrap(),
    );
    let report = app
        .projections
        .replay(UserProjection::NAME, &history)
        .await
        .unwrap();
    assert_eq!(report.processed, 4);
    let rebuilt = app.queries.dispatch(&GetUser::new("user-7")).await.unwrap().data;
    assert_eq!(rebuilt, view);
}

#[tokio::test]
async fn test_stopped_bus_still_commits_the_command() {
    // Arrange
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::default());
    let stores = StoreSet::in_memory(clock.clone());
    let bus = Arc::new(InMemoryEventBus::new());
    let read_store = Arc::new(InMemoryReadStore::new());
    let context = AccountsContext::new(
        build_repository::<User>(&RampartConfig::default(), &stores),
        bus.clone(),
        read_store,
        clock,
    );
    let mut commands = CommandDispatcher::new();
    let mut queries = QueryDispatcher::new();
    let projections = ProjectionManager::new(bus.clone());
    context
        .register(&mut commands, &mut queries, &projections)
        .unwrap();
    projections.start().unwrap();
    bus.stop().await.unwrap();

    // Act
    let result = commands
        .dispatch(&CreateUser::new("user-1", "ada@example.com", "Ada"))
        .await;

    // Assert: durable, but the view lags until a replay.
    assert_eq!(result.version(), Some(1));
    assert_eq!(
        stores
            .events
            .get_last_event_version(&AggregateId::from("user-1"))
            .await
            .unwrap(),
        1
    );
    assert!(matches!(
        queries.dispatch(&GetUser::new("user-1")).await,
        Err(DomainError::AggregateNotFound(_))
    ));
}
