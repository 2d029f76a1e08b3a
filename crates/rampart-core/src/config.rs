//! Runtime configuration read from environment variables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DomainError;
use crate::snapshot::SnapshotPolicy;

/// Default persistence strategy for every aggregate type.
pub const PERSISTENCE_DEFAULT_VAR: &str = "RAMPART_PERSISTENCE_DEFAULT";
/// Per-aggregate-type strategy overrides, `Type=strategy,...`.
pub const PERSISTENCE_OVERRIDES_VAR: &str = "RAMPART_PERSISTENCE_OVERRIDES";
/// Events between snapshots; unset or 0 disables snapshots.
pub const SNAPSHOT_INTERVAL_VAR: &str = "RAMPART_SNAPSHOT_INTERVAL";
/// Upper bound on command and query dispatch, in milliseconds.
pub const DISPATCH_TIMEOUT_VAR: &str = "RAMPART_DISPATCH_TIMEOUT_MS";
/// Attempts made by the conflict retry helper.
pub const MAX_CONFLICT_RETRIES_VAR: &str = "RAMPART_MAX_CONFLICT_RETRIES";
/// Log output format, `json` or `pretty`.
pub const LOG_FORMAT_VAR: &str = "RAMPART_LOG_FORMAT";
/// PostgreSQL connection string.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// How an aggregate type is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PersistenceStrategy {
    /// Event log is the only store; state is rebuilt by replay.
    #[default]
    EventSourced,
    /// Only the latest state is stored.
    StateBased,
    /// Event log plus a materialized state record.
    Hybrid,
}

impl PersistenceStrategy {
    /// Configuration spelling of the strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventSourced => "event_sourced",
            Self::StateBased => "state_based",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for PersistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event_sourced" => Ok(Self::EventSourced),
            "state_based" => Ok(Self::StateBased),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(DomainError::Validation(format!(
                "unknown persistence strategy '{other}'"
            ))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(DomainError::Validation(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Strategy selection per aggregate type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Strategy for aggregate types without an override.
    pub default_strategy: PersistenceStrategy,
    /// Strategy per aggregate type.
    pub overrides: HashMap<String, PersistenceStrategy>,
}

impl PersistenceConfig {
    /// Uses `strategy` for every aggregate type.
    #[must_use]
    pub fn uniform(strategy: PersistenceStrategy) -> Self {
        Self {
            default_strategy: strategy,
            overrides: HashMap::new(),
        }
    }

    /// Adds an override for one aggregate type.
    #[must_use]
    pub fn with_override(mut self, aggregate_type: &str, strategy: PersistenceStrategy) -> Self {
        self.overrides.insert(aggregate_type.to_owned(), strategy);
        self
    }

    /// Strategy for `aggregate_type`.
    #[must_use]
    pub fn strategy_for(&self, aggregate_type: &str) -> PersistenceStrategy {
        self.overrides
            .get(aggregate_type)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

/// Workspace-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampartConfig {
    /// Repository strategy selection.
    pub persistence: PersistenceConfig,
    /// When event-sourced repositories take snapshots.
    pub snapshot_policy: SnapshotPolicy,
    /// Upper bound on a single dispatch; `None` means unbounded.
    pub dispatch_timeout: Option<Duration>,
    /// Attempts made by the conflict retry helper.
    pub max_conflict_retries: u32,
    /// Log output format.
    pub log_format: LogFormat,
    /// PostgreSQL connection string, when that backend is used.
    pub database_url: Option<String>,
}

impl Default for RampartConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceConfig::default(),
            snapshot_policy: SnapshotPolicy::Never,
            dispatch_timeout: None,
            max_conflict_retries: 3,
            log_format: LogFormat::Json,
            database_url: None,
        }
    }
}

impl RampartConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the first invalid variable.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the first invalid variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let default_strategy = match get(PERSISTENCE_DEFAULT_VAR) {
            Some(raw) => raw.parse().map_err(|e| invalid(PERSISTENCE_DEFAULT_VAR, &e))?,
            None => PersistenceStrategy::default(),
        };
        let overrides = match get(PERSISTENCE_OVERRIDES_VAR) {
            Some(raw) => parse_overrides(&raw)?,
            None => HashMap::new(),
        };

        let snapshot_policy = match get(SNAPSHOT_INTERVAL_VAR) {
            Some(raw) => match parse_number::<u32>(SNAPSHOT_INTERVAL_VAR, &raw)? {
                0 => SnapshotPolicy::Never,
                n => SnapshotPolicy::EveryNEvents(n),
            },
            None => defaults.snapshot_policy,
        };

        let dispatch_timeout = match get(DISPATCH_TIMEOUT_VAR) {
            Some(raw) => Some(Duration::from_millis(parse_number(DISPATCH_TIMEOUT_VAR, &raw)?)),
            None => None,
        };

        let max_conflict_retries = match get(MAX_CONFLICT_RETRIES_VAR) {
            Some(raw) => parse_number(MAX_CONFLICT_RETRIES_VAR, &raw)?,
            None => defaults.max_conflict_retries,
        };

        let log_format = match get(LOG_FORMAT_VAR) {
            Some(raw) => raw.parse().map_err(|e| invalid(LOG_FORMAT_VAR, &e))?,
            None => defaults.log_format,
        };

        Ok(Self {
            persistence: PersistenceConfig {
                default_strategy,
                overrides,
            },
            snapshot_policy,
            dispatch_timeout,
            max_conflict_retries,
            log_format,
            database_url: get(DATABASE_URL_VAR),
        })
    }
}

fn invalid(var: &str, err: &DomainError) -> DomainError {
    match err {
        DomainError::Validation(msg) => DomainError::Validation(format!("{var}: {msg}")),
        other => DomainError::Validation(format!("{var}: {other}")),
    }
}

fn parse_number<T>(var: &str, raw: &str) -> Result<T, DomainError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| DomainError::Validation(format!("{var} must be a non-negative integer: {e}")))
}

fn parse_overrides(raw: &str) -> Result<HashMap<String, PersistenceStrategy>, DomainError> {
    let mut overrides = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((aggregate_type, strategy)) = entry.split_once('=') else {
            return Err(DomainError::Validation(format!(
                "{PERSISTENCE_OVERRIDES_VAR}: expected Type=strategy, got '{entry}'"
            )));
        };
        let aggregate_type = aggregate_type.trim();
        if aggregate_type.is_empty() {
            return Err(DomainError::Validation(format!(
                "{PERSISTENCE_OVERRIDES_VAR}: missing aggregate type in '{entry}'"
            )));
        }
        let strategy = strategy
            .parse()
            .map_err(|e| invalid(PERSISTENCE_OVERRIDES_VAR, &e))?;
        overrides.insert(aggregate_type.to_owned(), strategy);
    }
    Ok(overrides)
}
