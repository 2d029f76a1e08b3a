//! Command routing.
//!
//! Handlers are registered explicitly, one per command type. Dispatch runs
//! the command's own validation first, then looks up the handler, then runs
//! it under the optional deadline. Every outcome, success or failure, comes
//! back as a [`CommandResult`] carrying the time spent.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rampart_core::command::{Command, CommandHandler, CommandOutcome, CommandResult};
use rampart_core::error::DomainError;
use tracing::{debug, info, instrument, warn};

/// Routes commands to their registered handler.
#[derive(Default)]
pub struct CommandDispatcher {
    // Values are `Arc<dyn CommandHandler<C>>` keyed by `C::COMMAND_TYPE`.
    handlers: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    timeout: Option<Duration>,
}

impl CommandDispatcher {
    /// Creates a dispatcher without a deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every handler run by `timeout`; `None` disables the bound.
    ///
    /// A `DomainError::Timeout` means the caller stopped waiting, not that
    /// nothing happened: the save may already have committed. Handlers
    /// built on [`AggregateCommandExecutor`](crate::AggregateCommandExecutor)
    /// still publish whatever was committed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers the handler for commands of type `C`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `C` already has a
    /// handler.
    pub fn register<C, H>(&mut self, handler: H) -> Result<(), DomainError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        if self.handlers.contains_key(C::COMMAND_TYPE) {
            return Err(DomainError::HandlerAlreadyRegistered(
                C::COMMAND_TYPE.to_owned(),
            ));
        }
        let handler: Arc<dyn CommandHandler<C>> = Arc::new(handler);
        self.handlers.insert(C::COMMAND_TYPE, Box::new(handler));
        debug!(command_type = C::COMMAND_TYPE, "registered command handler");
        Ok(())
    }

    /// Returns `true` if a handler is registered for `command_type`.
    #[must_use]
    pub fn is_registered(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Validates and runs a command.
    #[instrument(
        skip(self, command),
        fields(
            command_type = C::COMMAND_TYPE,
            command_id = %command.command_id(),
            aggregate_id = %command.aggregate_id(),
        )
    )]
    pub async fn dispatch<C: Command>(&self, command: &C) -> CommandResult {
        let started = Instant::now();
        let outcome = self.execute(command).await;
        let execution_time = started.elapsed();

        match &outcome {
            Ok(outcome) => info!(
                version = outcome.version,
                events = outcome.events.len(),
                elapsed_ms = execution_time.as_millis(),
                "command succeeded"
            ),
            Err(e) => warn!(
                error = %e,
                elapsed_ms = execution_time.as_millis(),
                "command failed"
            ),
        }

        CommandResult {
            command_id: command.command_id(),
            command_type: C::COMMAND_TYPE,
            outcome,
            execution_time,
        }
    }

    async fn execute<C: Command>(&self, command: &C) -> Result<CommandOutcome, DomainError> {
        command.validate()?;
        let handler = self.handler::<C>()?;
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(command))
                .await
                .map_err(|_| DomainError::Timeout(limit))?,
            None => handler.handle(command).await,
        }
    }

    fn handler<C: Command>(&self) -> Result<Arc<dyn CommandHandler<C>>, DomainError> {
        self.handlers
            .get(C::COMMAND_TYPE)
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn CommandHandler<C>>>())
            .cloned()
            .ok_or_else(|| DomainError::UnsupportedCommand(C::COMMAND_TYPE.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rampart_core::aggregate::AggregateId;
    use uuid::Uuid;

    use super::*;

    #[derive(Debug)]
    struct RenameCargo {
        command_id: Uuid,
        aggregate_id: AggregateId,
        name: String,
    }

    impl RenameCargo {
        fn new(name: &str) -> Self {
            Self {
                command_id: Uuid::new_v4(),
                aggregate_id: AggregateId::from("cargo-1"),
                name: name.to_owned(),
            }
        }
    }

    impl Command for RenameCargo {
        const COMMAND_TYPE: &'static str = "RenameCargo";

        fn command_id(&self) -> Uuid {
            self.command_id
        }

        fn aggregate_id(&self) -> &AggregateId {
            &self.aggregate_id
        }

        fn validate(&self) -> Result<(), DomainError> {
            rampart_core::command::require_non_blank("name", &self.name)
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl CommandHandler<RenameCargo> for Arc<CountingHandler> {
        async fn handle(&self, command: &RenameCargo) -> Result<CommandOutcome, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CommandOutcome::new(command.aggregate_id.clone(), 7, Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        // Arrange
        let handler = Arc::new(CountingHandler::default());
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register::<RenameCargo, _>(handler.clone()).unwrap();
        let command = RenameCargo::new("Blue Whale");

        // Act
        let result = dispatcher.dispatch(&command).await;

        // Assert
        assert!(result.is_success());
        assert_eq!(result.command_id, command.command_id);
        assert_eq!(result.command_type, "RenameCargo");
        assert_eq!(result.version(), Some(7));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_handler() {
        let handler = Arc::new(CountingHandler::default());
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register::<RenameCargo, _>(handler.clone()).unwrap();

        let result = dispatcher.dispatch(&RenameCargo::new("   ")).await;

        assert!(matches!(result.error(), Some(DomainError::Validation(_))));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_command_is_unsupported() {
        let dispatcher = CommandDispatcher::new();

        let result = dispatcher.dispatch(&RenameCargo::new("Blue Whale")).await;

        match result.error() {
            Some(DomainError::UnsupportedCommand(command_type)) => {
                assert_eq!(command_type, "RenameCargo");
            }
            other => panic!("expected UnsupportedCommand, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher
            .register::<RenameCargo, _>(Arc::new(CountingHandler::default()))
            .unwrap();

        let result = dispatcher.register::<RenameCargo, _>(Arc::new(CountingHandler::default()));

        assert!(matches!(
            result,
            Err(DomainError::HandlerAlreadyRegistered(ref t)) if t == "RenameCargo"
        ));
        assert!(dispatcher.is_registered("RenameCargo"));
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        // Arrange
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            delay: Some(Duration::from_secs(5)),
        });
        let mut dispatcher =
            CommandDispatcher::new().with_timeout(Some(Duration::from_millis(20)));
        dispatcher.register::<RenameCargo, _>(handler).unwrap();

        // Act
        let result = dispatcher.dispatch(&RenameCargo::new("Blue Whale")).await;

        // Assert
        assert!(matches!(
            result.error(),
            Some(DomainError::Timeout(limit)) if *limit == Duration::from_millis(20)
        ));
        assert!(result.execution_time >= Duration::from_millis(20));
    }
}
