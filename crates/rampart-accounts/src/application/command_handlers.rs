//! Command handlers for the accounts context.
//!
//! Each handler maps its command onto one `User` business method; loading,
//! saving and publishing are left to the shared executor.

use async_trait::async_trait;
use rampart_core::aggregate::AggregateRoot;
use rampart_core::command::{CommandHandler, CommandOutcome};
use rampart_core::error::DomainError;
use rampart_cqrs::AggregateCommandExecutor;
use rampart_cqrs::command_dispatcher::CommandDispatcher;

use crate::domain::aggregates::User;
use crate::domain::commands::{ChangeEmail, CreateUser, DeactivateUser, DeleteUser};

/// Handles every `User` command.
#[derive(Clone)]
pub struct UserCommandHandler {
    executor: AggregateCommandExecutor<User>,
}

impl UserCommandHandler {
    /// Creates a handler over `executor`.
    #[must_use]
    pub fn new(executor: AggregateCommandExecutor<User>) -> Self {
        Self { executor }
    }

    /// Registers this handler for all four user commands.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if any of them already
    /// has a handler.
    pub fn register(self, dispatcher: &mut CommandDispatcher) -> Result<(), DomainError> {
        dispatcher.register::<CreateUser, _>(self.clone())?;
        dispatcher.register::<ChangeEmail, _>(self.clone())?;
        dispatcher.register::<DeactivateUser, _>(self.clone())?;
        dispatcher.register::<DeleteUser, _>(self)
    }
}

#[async_trait]
impl CommandHandler<CreateUser> for UserCommandHandler {
    async fn handle(&self, command: &CreateUser) -> Result<CommandOutcome, DomainError> {
        self.executor
            .create(command, |user, ctx| {
                *user = User::register(
                    user.aggregate_id().clone(),
                    &command.email,
                    &command.display_name,
                    ctx,
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl CommandHandler<ChangeEmail> for UserCommandHandler {
    async fn handle(&self, command: &ChangeEmail) -> Result<CommandOutcome, DomainError> {
        self.executor
            .update(command, |user, ctx| user.change_email(&command.email, ctx))
            .await
    }
}

#[async_trait]
impl CommandHandler<DeactivateUser> for UserCommandHandler {
    async fn handle(&self, command: &DeactivateUser) -> Result<CommandOutcome, DomainError> {
        self.executor
            .update(command, |user, ctx| user.deactivate(command.reason.clone(), ctx))
            .await
    }
}

#[async_trait]
impl CommandHandler<DeleteUser> for UserCommandHandler {
    async fn handle(&self, command: &DeleteUser) -> Result<CommandOutcome, DomainError> {
        self.executor.update(command, |user, ctx| user.delete(ctx)).await
    }
}
