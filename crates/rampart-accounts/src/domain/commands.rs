//! Commands for the accounts context.

use rampart_core::aggregate::AggregateId;
use rampart_core::command::{Command, require_non_blank};
use rampart_core::error::DomainError;
use rampart_core::event::Issuer;
use uuid::Uuid;

use super::aggregates::validate_email;

fn require_user_id(user_id: &AggregateId) -> Result<(), DomainError> {
    require_non_blank("user_id", user_id.as_str())
}

/// Command to register a new user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    /// Unique command identifier.
    pub command_id: Uuid,
    /// The user to create.
    pub user_id: AggregateId,
    /// Contact email.
    pub email: String,
    /// Name shown to other users.
    pub display_name: String,
    /// Who issued the command.
    pub issuer: Option<Issuer>,
}

impl CreateUser {
    /// Creates the command with a fresh command id.
    #[must_use]
    pub fn new(user_id: impl Into<AggregateId>, email: &str, display_name: &str) -> Self {
        Self {
            command_id: Uuid::now_v7(),
            user_id: user_id.into(),
            email: email.to_owned(),
            display_name: display_name.to_owned(),
            issuer: None,
        }
    }
}

impl Command for CreateUser {
    const COMMAND_TYPE: &'static str = "CreateUser";

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn aggregate_id(&self) -> &AggregateId {
        &self.user_id
    }

    fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        require_user_id(&self.user_id)?;
        validate_email(&self.email)?;
        require_non_blank("display_name", &self.display_name)
    }
}

/// Command to change a user's email.
#[derive(Debug, Clone)]
pub struct ChangeEmail {
    /// Unique command identifier.
    pub command_id: Uuid,
    /// The user to change.
    pub user_id: AggregateId,
    /// The new email.
    pub email: String,
    /// Who issued the command.
    pub issuer: Option<Issuer>,
}

impl ChangeEmail {
    /// Creates the command with a fresh command id.
    #[must_use]
    pub fn new(user_id: impl Into<AggregateId>, email: &str) -> Self {
        Self {
            command_id: Uuid::now_v7(),
            user_id: user_id.into(),
            email: email.to_owned(),
            issuer: None,
        }
    }
}

impl Command for ChangeEmail {
    const COMMAND_TYPE: &'static str = "ChangeEmail";

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn aggregate_id(&self) -> &AggregateId {
        &self.user_id
    }

    fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        require_user_id(&self.user_id)?;
        validate_email(&self.email)
    }
}

/// Command to deactivate a user.
#[derive(Debug, Clone)]
pub struct DeactivateUser {
    /// Unique command identifier.
    pub command_id: Uuid,
    /// The user to deactivate.
    pub user_id: AggregateId,
    /// Optional operator note.
    pub reason: Option<String>,
    /// Who issued the command.
    pub issuer: Option<Issuer>,
}

impl DeactivateUser {
    /// Creates the command with a fresh command id.
    #[must_use]
    pub fn new(user_id: impl Into<AggregateId>, reason: Option<&str>) -> Self {
        Self {
            command_id: Uuid::now_v7(),
            user_id: user_id.into(),
            reason: reason.map(str::to_owned),
            issuer: None,
        }
    }
}

impl Command for DeactivateUser {
    const COMMAND_TYPE: &'static str = "DeactivateUser";

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn aggregate_id(&self) -> &AggregateId {
        &self.user_id
    }

    fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        require_user_id(&self.user_id)
    }
}

/// Command to soft-delete a user.
#[derive(Debug, Clone)]
pub struct DeleteUser {
    /// Unique command identifier.
    pub command_id: Uuid,
    /// The user to delete.
    pub user_id: AggregateId,
    /// Who issued the command.
    pub issuer: Option<Issuer>,
}

impl DeleteUser {
    /// Creates the command with a fresh command id.
    #[must_use]
    pub fn new(user_id: impl Into<AggregateId>) -> Self {
        Self {
            command_id: Uuid::now_v7(),
            user_id: user_id.into(),
            issuer: None,
        }
    }
}

impl Command for DeleteUser {
    const COMMAND_TYPE: &'static str = "DeleteUser";

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn aggregate_id(&self) -> &AggregateId {
        &self.user_id
    }

    fn issuer(&self) -> Option<&Issuer> {
        self.issuer.as_ref()
    }

    fn validate(&self) -> Result<(), DomainError> {
        require_user_id(&self.user_id)
    }
}
