//! The `UserView` read model.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::bus::EventFilter;
use rampart_core::error::DomainError;
use rampart_core::event::StoredEvent;
use rampart_core::projection::Projection;
use rampart_core::read_store::{ReadModel, ReadStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::aggregates::UserStatus;
use crate::domain::events::{USER_EVENT_TYPES, UserEvent};

/// Model type tag of user views.
pub const USER_VIEW: &str = "UserView";

/// Denormalized view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserView {
    /// The user identifier.
    pub id: String,
    /// Contact email.
    pub email: String,
    /// Name shown to other users.
    pub display_name: String,
    /// Lifecycle status.
    pub status: UserStatus,
    /// When the user registered.
    pub created_at: DateTime<Utc>,
    /// When the view last changed.
    pub updated_at: DateTime<Utc>,
    /// Aggregate version reflected by the view.
    pub version: i64,
}

/// Keeps one `UserView` per user.
///
/// Redelivered or replayed events are ignored by comparing the event
/// version with the version stored on the view.
pub struct UserProjection {
    store: Arc<dyn ReadStore>,
}

impl UserProjection {
    /// Unique projection name.
    pub const NAME: &'static str = "user_view";

    /// Creates the projection over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ReadStore>) -> Self {
        Self { store }
    }

    async fn existing(&self, event: &StoredEvent) -> Result<Option<UserView>, DomainError> {
        self.store
            .get_by_id(event.aggregate_id.as_str(), USER_VIEW)
            .await?
            .map(|model| model.decode::<UserView>())
            .transpose()
    }

    async fn write(&self, view: &UserView) -> Result<(), DomainError> {
        let model = ReadModel::from_view(view.id.clone(), USER_VIEW, view.version, view, view.updated_at)?;
        self.store.upsert(model).await
    }
}

#[async_trait]
impl Projection for UserProjection {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn filter(&self) -> EventFilter {
        EventFilter::types(USER_EVENT_TYPES)
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let payload: UserEvent = serde_json::from_value(event.payload.clone())?;
        let existing = self.existing(event).await?;
        if existing.as_ref().is_some_and(|view| view.version >= event.version) {
            debug!(
                aggregate_id = %event.aggregate_id,
                version = event.version,
                "user view already reflects event"
            );
            return Ok(());
        }

        let view = match (payload, existing) {
            (
                UserEvent::Created {
                    email,
                    display_name,
                },
                _,
            ) => UserView {
                id: event.aggregate_id.to_string(),
                email,
                display_name,
                status: UserStatus::Active,
                created_at: event.occurred_at,
                updated_at: event.occurred_at,
                version: event.version,
            },
            (_, None) => {
                return Err(DomainError::AggregateNotFound(event.aggregate_id.clone()));
            }
            (UserEvent::EmailChanged { email, .. }, Some(view)) => UserView { email, ..view },
            (UserEvent::Deactivated { .. }, Some(view)) => UserView {
                status: UserStatus::Deactivated,
                ..view
            },
            (UserEvent::Deleted, Some(view)) => UserView {
                status: UserStatus::Deleted,
                ..view
            },
        };
        let view = UserView {
            updated_at: event.occurred_at,
            version: event.version,
            ..view
        };
        self.write(&view).await
    }

    async fn reset(&self) -> Result<(), DomainError> {
        let removed = self.store.clear(USER_VIEW).await?;
        debug!(removed, "cleared user views");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::aggregate::{AggregateId, AggregateRoot, EventContext};
    use rampart_cqrs::InMemoryReadStore;
    use rampart_test_support::{SteppingClock, test_epoch};

    use super::*;
    use crate::domain::aggregates::User;

    fn history() -> Vec<StoredEvent> {
        let clock = SteppingClock::new(test_epoch(), chrono::Duration::minutes(1));
        let ctx = EventContext::new(&clock);
        let mut user = User::register(AggregateId::from("user-42"), "ada@example.com", "Ada", &ctx).unwrap();
        user.change_email("ada@lovelace.dev", &ctx).unwrap();
        user.deactivate(None, &ctx).unwrap();
        user.stored_changes().unwrap()
    }

    async fn view(store: &InMemoryReadStore) -> UserView {
        store
            .get_by_id("user-42", USER_VIEW)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_events_build_the_view() {
        // Arrange
        let store = Arc::new(InMemoryReadStore::new());
        let projection = UserProjection::new(store.clone());
        let events = history();

        // Act
        for event in &events {
            projection.handle(event).await.unwrap();
        }

        // Assert
        let view = view(&store).await;
        assert_eq!(view.email, "ada@lovelace.dev");
        assert_eq!(view.display_name, "Ada");
        assert_eq!(view.status, UserStatus::Deactivated);
        assert_eq!(view.version, 3);
        assert_eq!(view.created_at, events[0].occurred_at);
        assert_eq!(view.updated_at, events[2].occurred_at);
    }

    #[tokio::test]
    async fn test_redelivery_leaves_view_unchanged() {
        let store = Arc::new(InMemoryReadStore::new());
        let projection = UserProjection::new(store.clone());
        let events = history();
        for event in &events {
            projection.handle(event).await.unwrap();
        }
        let before = view(&store).await;

        projection.handle(&events[1]).await.unwrap();
        projection.handle(&events[0]).await.unwrap();

        assert_eq!(view(&store).await, before);
    }

    #[tokio::test]
    async fn test_update_without_view_fails() {
        let store = Arc::new(InMemoryReadStore::new());
        let projection = UserProjection::new(store);

        let result = projection.handle(&history()[1]).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }

    #[tokio::test]
    async fn test_reset_clears_views() {
        let store = Arc::new(InMemoryReadStore::new());
        let projection = UserProjection::new(store.clone());
        projection.handle(&history()[0]).await.unwrap();

        projection.reset().await.unwrap();

        assert!(store.get_by_id("user-42", USER_VIEW).await.unwrap().is_none());
    }
}
