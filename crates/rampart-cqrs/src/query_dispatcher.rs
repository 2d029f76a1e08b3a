//! Query routing.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rampart_core::error::DomainError;
use rampart_core::query::{Query, QueryHandler, QueryResult};
use tracing::{debug, instrument};

/// Routes queries to their registered handler.
#[derive(Default)]
pub struct QueryDispatcher {
    // Values are `Arc<dyn QueryHandler<Q>>` keyed by `Q::QUERY_TYPE`.
    handlers: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    timeout: Option<Duration>,
}

impl QueryDispatcher {
    /// Creates a dispatcher without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every handler run by `timeout`; `None` disables the bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers the handler for queries of type `Q`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `Q` already has a
    /// handler.
    pub fn register<Q, H>(&mut self, handler: H) -> Result<(), DomainError>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        if self.handlers.contains_key(Q::QUERY_TYPE) {
            return Err(DomainError::HandlerAlreadyRegistered(Q::QUERY_TYPE.to_owned()));
        }
        let handler: Arc<dyn QueryHandler<Q>> = Arc::new(handler);
        self.handlers.insert(Q::QUERY_TYPE, Box::new(handler));
        Ok(())
    }

    /// Validates and runs a query.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the query is invalid,
    /// `DomainError::UnsupportedQuery` if no handler is registered,
    /// `DomainError::Timeout` if the deadline passes, or the handler's error.
    #[instrument(
        skip(self, query),
        fields(query_type = Q::QUERY_TYPE, query_id = %query.query_id()),
        err
    )]
    pub async fn dispatch<Q: Query>(&self, query: &Q) -> Result<QueryResult<Q::Output>, DomainError> {
        let started = Instant::now();
        query.validate()?;
        let handler = self
            .handlers
            .get(Q::QUERY_TYPE)
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn QueryHandler<Q>>>())
            .cloned()
            .ok_or_else(|| DomainError::UnsupportedQuery(Q::QUERY_TYPE.to_owned()))?;

        let data = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(query))
                .await
                .map_err(|_| DomainError::Timeout(limit))??,
            None => handler.handle(query).await?,
        };
        let execution_time = started.elapsed();
        debug!(elapsed_ms = execution_time.as_millis(), "query answered");

        Ok(QueryResult {
            query_id: query.query_id(),
            query_type: Q::QUERY_TYPE,
            data,
            execution_time,
        })
    }
}
