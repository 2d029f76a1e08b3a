//! Query handlers for the accounts context.
//!
//! Queries are answered from `UserView` read models, never from the event
//! store, so results trail commands until the projection catches up.

use std::sync::Arc;

use async_trait::async_trait;
use rampart_core::aggregate::AggregateId;
use rampart_core::error::DomainError;
use rampart_core::query::{Page, Pagination, Query, QueryHandler, Sorting};
use rampart_core::read_store::{Criteria, ReadModel, ReadStore};
use rampart_cqrs::query_dispatcher::QueryDispatcher;
use uuid::Uuid;

use super::projections::{USER_VIEW, UserView};
use crate::domain::aggregates::UserStatus;

/// Fields `ListUsers` may sort by.
pub const SORTABLE_FIELDS: [&str; 6] = ["id", "email", "display_name", "status", "created_at", "version"];

/// Query for one user view.
#[derive(Debug, Clone)]
pub struct GetUser {
    /// Unique query identifier.
    pub query_id: Uuid,
    /// The user to fetch.
    pub user_id: String,
}

impl GetUser {
    /// Creates the query with a fresh query id.
    #[must_use]
    pub fn new(user_id: &str) -> Self {
        Self {
            query_id: Uuid::now_v7(),
            user_id: user_id.to_owned(),
        }
    }
}

impl Query for GetUser {
    const QUERY_TYPE: &'static str = "GetUser";
    type Output = UserView;

    fn query_id(&self) -> Uuid {
        self.query_id
    }

    fn validate(&self) -> Result<(), DomainError> {
        rampart_core::command::require_non_blank("user_id", &self.user_id)
    }
}

/// Query for a page of user views.
#[derive(Debug, Clone)]
pub struct ListUsers {
    /// Unique query identifier.
    pub query_id: Uuid,
    /// Page to return.
    pub pagination: Pagination,
    /// Sort order; defaults to registration time, then id.
    pub sorting: Option<Sorting>,
    /// Case-insensitive substring matched against email and display name.
    pub search: Option<String>,
    /// Only users with this status.
    pub status: Option<UserStatus>,
    /// Whether deleted users are listed when no status is given.
    pub include_deleted: bool,
}

impl ListUsers {
    /// First page of active and deactivated users, default page size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            query_id: Uuid::now_v7(),
            pagination: Pagination::default(),
            sorting: None,
            search: None,
            status: None,
            include_deleted: false,
        }
    }

    /// Selects a page.
    #[must_use]
    pub fn page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn sorted_by(mut self, sorting: Sorting) -> Self {
        self.sorting = Some(sorting);
        self
    }

    /// Filters by a search term.
    #[must_use]
    pub fn search(mut self, term: &str) -> Self {
        self.search = Some(term.to_owned());
        self
    }

    /// Filters by status.
    #[must_use]
    pub fn with_status(mut self, status: UserStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn criteria(&self) -> Criteria {
        let mut criteria = Criteria::for_type(USER_VIEW)
            .sorted_by(self.sorting.clone().unwrap_or_else(|| Sorting::asc("created_at")));
        if let Some(status) = self.status {
            criteria = criteria.filter_eq("status", status.as_str());
        }
        let term = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        let hide_deleted = self.status.is_none() && !self.include_deleted;
        if term.is_some() || hide_deleted {
            criteria = criteria.matching(move |model| {
                (!hide_deleted || !has_status(model, UserStatus::Deleted))
                    && term.as_deref().is_none_or(|t| {
                        text_field(model, "email").contains(t) || text_field(model, "display_name").contains(t)
                    })
            });
        }
        criteria
    }
}

impl Default for ListUsers {
    fn default() -> Self {
        Self::new()
    }
}

fn has_status(model: &ReadModel, status: UserStatus) -> bool {
    model.data.get("status").and_then(|s| s.as_str()) == Some(status.as_str())
}

fn text_field(model: &ReadModel, field: &str) -> String {
    model
        .data
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase()
}

impl Query for ListUsers {
    const QUERY_TYPE: &'static str = "ListUsers";
    type Output = Page<UserView>;

    fn query_id(&self) -> Uuid {
        self.query_id
    }

    fn validate(&self) -> Result<(), DomainError> {
        self.pagination.validate()?;
        match &self.sorting {
            Some(sorting) if !SORTABLE_FIELDS.contains(&sorting.field.as_str()) => Err(
                DomainError::Validation(format!("cannot sort users by {}", sorting.field)),
            ),
            _ => Ok(()),
        }
    }
}

/// Answers user queries from the read store.
#[derive(Clone)]
pub struct UserQueryHandler {
    store: Arc<dyn ReadStore>,
}

impl UserQueryHandler {
    /// Creates a handler over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ReadStore>) -> Self {
        Self { store }
    }

    /// Registers this handler for both user queries.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if either already has
    /// a handler.
    pub fn register(self, dispatcher: &mut QueryDispatcher) -> Result<(), DomainError> {
        dispatcher.register::<GetUser, _>(self.clone())?;
        dispatcher.register::<ListUsers, _>(self)
    }
}

#[async_trait]
impl QueryHandler<GetUser> for UserQueryHandler {
    async fn handle(&self, query: &GetUser) -> Result<UserView, DomainError> {
        self.store
            .get_by_id(&query.user_id, USER_VIEW)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound(AggregateId::from(query.user_id.as_str())))?
            .decode()
    }
}

#[async_trait]
impl QueryHandler<ListUsers> for UserQueryHandler {
    async fn handle(&self, query: &ListUsers) -> Result<Page<UserView>, DomainError> {
        let criteria = query.criteria();
        let total_count = self.store.count(&criteria).await?;
        let models = self
            .store
            .query(&criteria.paginate(query.pagination))
            .await?;
        let items = models
            .iter()
            .map(ReadModel::decode::<UserView>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total_count, query.pagination))
    }
}
