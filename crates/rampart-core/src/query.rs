//! Query abstractions.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Trait that all queries implement.
pub trait Query: Send + Sync + std::fmt::Debug + 'static {
    /// The type name used to route this query.
    const QUERY_TYPE: &'static str;

    /// What the handler returns.
    type Output: Send + 'static;

    /// Unique identifier of this query instance.
    fn query_id(&self) -> Uuid;

    /// The type name for this query (for logging/routing).
    fn query_type(&self) -> &'static str {
        Self::QUERY_TYPE
    }

    /// Structural checks run before dispatch.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` describing the first failed check.
    fn validate(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Handles one query type. Must not mutate state.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// Runs the query.
    async fn handle(&self, query: &Q) -> Result<Q::Output, DomainError>;
}

/// Result of a dispatched query.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// The query that produced this result.
    pub query_id: Uuid,
    /// The query type name.
    pub query_type: &'static str,
    /// Handler output.
    pub data: T,
    /// Time spent in validation and the handler.
    pub execution_time: Duration,
}

/// Page selection, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, starting at 1.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
}

impl Pagination {
    /// Largest accepted page size.
    pub const MAX_PAGE_SIZE: u32 = 100;
    /// Page size used when none is requested.
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    /// Creates a pagination, clamping `page_size` to [`Self::MAX_PAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `page` or `page_size` is zero.
    pub fn new(page: u32, page_size: u32) -> Result<Self, DomainError> {
        let pagination = Self {
            page,
            page_size: page_size.min(Self::MAX_PAGE_SIZE),
        };
        pagination.validate()?;
        Ok(pagination)
    }

    /// Checks the page bounds.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `page` or `page_size` is zero or
    /// `page_size` exceeds [`Self::MAX_PAGE_SIZE`].
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.page == 0 {
            return Err(DomainError::Validation("page must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > Self::MAX_PAGE_SIZE {
            return Err(DomainError::Validation(format!(
                "page_size must be between 1 and {}",
                Self::MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Number of items skipped before this page.
    #[must_use]
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }

    /// Maximum number of items on this page.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    /// Field of the read model to sort by.
    pub field: String,
    /// Sort direction.
    pub order: SortOrder,
}

impl Sorting {
    /// Ascending sort on `field`.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending sort on `field`.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Items matching the query across all pages.
    pub total_count: usize,
    /// Page number, starting at 1.
    pub page: u32,
    /// Requested page size.
    pub page_size: u32,
    /// Number of pages needed for `total_count` items.
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Assembles a page.
    #[must_use]
    pub fn new(items: Vec<T>, total_count: usize, pagination: Pagination) -> Self {
        let size = pagination.limit().max(1);
        Self {
            items,
            total_count,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: total_count.div_ceil(size),
        }
    }

    /// Maps the items, keeping the page bookkeeping.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
