//! Command abstractions.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::AggregateId;
use crate::error::DomainError;
use crate::event::{Issuer, StoredEvent};

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug + 'static {
    /// The type name used to route this command.
    const COMMAND_TYPE: &'static str;

    /// Unique identifier of this command instance.
    fn command_id(&self) -> Uuid;

    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str {
        Self::COMMAND_TYPE
    }

    /// The aggregate this command targets.
    fn aggregate_id(&self) -> &AggregateId;

    /// Who issued the command.
    fn issuer(&self) -> Option<&Issuer> {
        None
    }

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid {
        self.command_id()
    }

    /// Structural and business-rule checks run before dispatch.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` describing the first failed check.
    fn validate(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Handles one command type.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    /// Executes the command against its aggregate.
    async fn handle(&self, command: &C) -> Result<CommandOutcome, DomainError>;
}

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// The aggregate affected by the command.
    pub aggregate_id: AggregateId,
    /// The aggregate version after the command.
    pub version: i64,
    /// Events persisted by the command, in version order.
    pub events: Vec<StoredEvent>,
    /// Optional handler-specific data.
    pub data: Option<serde_json::Value>,
}

impl CommandOutcome {
    /// Creates an outcome without extra data.
    #[must_use]
    pub fn new(aggregate_id: AggregateId, version: i64, events: Vec<StoredEvent>) -> Self {
        Self {
            aggregate_id,
            version,
            events,
            data: None,
        }
    }

    /// Attaches handler-specific data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Result of a dispatched command, successful or not.
#[derive(Debug)]
pub struct CommandResult {
    /// The dispatched command.
    pub command_id: Uuid,
    /// The command type name.
    pub command_type: &'static str,
    /// Handler outcome or the error that stopped it.
    pub outcome: Result<CommandOutcome, DomainError>,
    /// Time spent in validation and the handler.
    pub execution_time: Duration,
}

impl CommandResult {
    /// Returns `true` if the command succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the error, if the command failed.
    #[must_use]
    pub fn error(&self) -> Option<&DomainError> {
        self.outcome.as_ref().err()
    }

    /// Returns the persisted events; empty on failure.
    #[must_use]
    pub fn events(&self) -> &[StoredEvent] {
        self.outcome.as_ref().map_or(&[], |o| o.events.as_slice())
    }

    /// Returns the aggregate version after the command, if it succeeded.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        self.outcome.as_ref().ok().map(|o| o.version)
    }

    /// Converts into the plain outcome.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the command.
    pub fn into_result(self) -> Result<CommandOutcome, DomainError> {
        self.outcome
    }
}

/// Fails with `DomainError::Validation` if `value` is blank.
///
/// # Errors
///
/// Returns `DomainError::Validation` naming `field`.
pub fn require_non_blank(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_non_blank() {
        assert!(require_non_blank("email", "a@b.c").is_ok());

        match require_non_blank("email", "  ") {
            Err(DomainError::Validation(msg)) => assert_eq!(msg, "email must not be empty"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_result_exposes_error_and_no_events() {
        let result = CommandResult {
            command_id: Uuid::new_v4(),
            command_type: "CreateUser",
            outcome: Err(DomainError::Validation("email must not be empty".into())),
            execution_time: Duration::from_millis(1),
        };

        assert!(!result.is_success());
        assert!(result.events().is_empty());
        assert_eq!(result.version(), None);
        assert!(matches!(result.error(), Some(DomainError::Validation(_))));
    }
}
