//! Application layer of the accounts context.

pub mod command_handlers;
pub mod projections;
pub mod query_handlers;

use std::sync::Arc;

use rampart_core::bus::EventBus;
use rampart_core::clock::Clock;
use rampart_core::error::DomainError;
use rampart_core::read_store::ReadStore;
use rampart_core::repository::Repository;
use rampart_cqrs::{AggregateCommandExecutor, CommandDispatcher, ProjectionManager, QueryDispatcher};

use crate::domain::aggregates::User;
use command_handlers::UserCommandHandler;
use projections::UserProjection;
use query_handlers::UserQueryHandler;

/// Everything the accounts context needs, wired once at startup.
pub struct AccountsContext {
    repository: Arc<dyn Repository<User>>,
    bus: Arc<dyn EventBus>,
    read_store: Arc<dyn ReadStore>,
    clock: Arc<dyn Clock>,
}

impl AccountsContext {
    /// Creates the context from its dependencies.
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository<User>>,
        bus: Arc<dyn EventBus>,
        read_store: Arc<dyn ReadStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            bus,
            read_store,
            clock,
        }
    }

    /// Registers the context's command handlers, query handlers and
    /// projection.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if any of them is
    /// registered twice.
    pub fn register(
        &self,
        commands: &mut CommandDispatcher,
        queries: &mut QueryDispatcher,
        projections: &ProjectionManager,
    ) -> Result<(), DomainError> {
        let executor = AggregateCommandExecutor::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.bus),
            Arc::clone(&self.clock),
        );
        UserCommandHandler::new(executor).register(commands)?;
        UserQueryHandler::new(Arc::clone(&self.read_store)).register(queries)?;
        projections.register(Arc::new(UserProjection::new(Arc::clone(&self.read_store))))
    }
}
