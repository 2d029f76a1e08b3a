//! Aggregate roots for the accounts context.

use std::fmt;

use rampart_core::aggregate::{AggregateId, AggregateRoot, BaseAggregate, EventContext};
use rampart_core::command::require_non_blank;
use rampart_core::error::DomainError;
use rampart_core::event::EventMessage;
use serde::{Deserialize, Serialize};

use super::events::UserEvent;

/// Lifecycle status of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Registered and usable.
    #[default]
    Active,
    /// Blocked from signing in; can still be deleted.
    Deactivated,
    /// Soft-deleted; rejects every further change.
    Deleted,
}

impl UserStatus {
    /// Lowercase name, as stored in read models.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deactivated => "deactivated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable state of a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    /// Contact email.
    pub email: String,
    /// Name shown to other users.
    pub display_name: String,
    /// Lifecycle status.
    pub status: UserStatus,
}

/// Checks that `email` looks like `local@domain`.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a blank or malformed email.
pub fn validate_email(email: &str) -> Result<(), DomainError> {
    require_non_blank("email", email)?;
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        && !email.chars().any(char::is_whitespace);
    if !well_formed {
        return Err(DomainError::Validation(format!("email {email:?} is malformed")));
    }
    Ok(())
}

/// The aggregate root for a user account.
#[derive(Debug, Clone)]
pub struct User {
    base: BaseAggregate<UserEvent>,
    state: UserState,
}

impl User {
    /// Registers a new user.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a malformed email or a blank
    /// display name.
    pub fn register(
        id: AggregateId,
        email: &str,
        display_name: &str,
        ctx: &EventContext<'_>,
    ) -> Result<Self, DomainError> {
        validate_email(email)?;
        require_non_blank("display_name", display_name)?;
        let mut user = Self::empty(id);
        user.raise(
            UserEvent::Created {
                email: email.to_owned(),
                display_name: display_name.trim().to_owned(),
            },
            ctx,
        )?;
        Ok(user)
    }

    /// Changes the email. Changing to the current email records nothing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a malformed email or an
    /// inactive user, `DomainError::AggregateNotFound` for a deleted one.
    pub fn change_email(&mut self, email: &str, ctx: &EventContext<'_>) -> Result<(), DomainError> {
        self.ensure_live()?;
        validate_email(email)?;
        if self.state.status == UserStatus::Deactivated {
            return Err(DomainError::Validation(format!(
                "user {} is deactivated",
                self.aggregate_id()
            )));
        }
        if self.state.email == email {
            return Ok(());
        }
        self.raise(
            UserEvent::EmailChanged {
                previous: self.state.email.clone(),
                email: email.to_owned(),
            },
            ctx,
        )
    }

    /// Deactivates the user. Deactivating twice records nothing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for a deleted user.
    pub fn deactivate(&mut self, reason: Option<String>, ctx: &EventContext<'_>) -> Result<(), DomainError> {
        self.ensure_live()?;
        if self.state.status == UserStatus::Deactivated {
            return Ok(());
        }
        self.raise(UserEvent::Deactivated { reason }, ctx)
    }

    /// Soft-deletes the user.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the user is already
    /// deleted.
    pub fn delete(&mut self, ctx: &EventContext<'_>) -> Result<(), DomainError> {
        self.ensure_live()?;
        self.raise(UserEvent::Deleted, ctx)
    }

    fn ensure_live(&self) -> Result<(), DomainError> {
        if self.current_version() == 0 || self.is_deleted() {
            return Err(DomainError::AggregateNotFound(self.aggregate_id().clone()));
        }
        Ok(())
    }
}

impl AggregateRoot for User {
    const AGGREGATE_TYPE: &'static str = "User";
    type Event = UserEvent;
    type State = UserState;

    fn from_parts(base: BaseAggregate<UserEvent>, state: UserState) -> Self {
        Self { base, state }
    }

    fn base(&self) -> &BaseAggregate<UserEvent> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseAggregate<UserEvent> {
        &mut self.base
    }

    fn state(&self) -> &UserState {
        &self.state
    }

    fn apply(&mut self, event: &EventMessage<UserEvent>) {
        match event.payload() {
            UserEvent::Created {
                email,
                display_name,
            } => {
                self.state.email.clone_from(email);
                self.state.display_name.clone_from(display_name);
                self.state.status = UserStatus::Active;
            }
            UserEvent::EmailChanged { email, .. } => self.state.email.clone_from(email),
            UserEvent::Deactivated { .. } => self.state.status = UserStatus::Deactivated,
            UserEvent::Deleted => self.state.status = UserStatus::Deleted,
        }
    }

    fn is_deleted(&self) -> bool {
        self.state.status == UserStatus::Deleted
    }
}
