//! Event store database schema.
//!
//! Mirrors `migrations/0001_create_rampart_tables.sql`; used by
//! [`crate::pg_event_store::PgEventStore::ensure_schema`] where migrations
//! are not run.

/// SQL to create the event log.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS domain_events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    TEXT NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL CHECK (version > 0),
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    issuer_id       TEXT,
    issuer_type     TEXT,
    correlation_id  UUID,
    UNIQUE (aggregate_id, version)
);

CREATE INDEX IF NOT EXISTS idx_domain_events_correlation_id
    ON domain_events (correlation_id);
";

/// SQL to create the snapshot table.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS aggregate_snapshots (
    aggregate_id    TEXT NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL CHECK (version > 0),
    state           JSONB NOT NULL,
    taken_at        TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (aggregate_id, version)
);
";

/// SQL to create the current-state table.
pub const CREATE_STATES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS aggregate_states (
    aggregate_id    TEXT PRIMARY KEY,
    aggregate_type  VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL CHECK (version >= 0),
    state           JSONB NOT NULL,
    state_hash      CHAR(64) NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);
";

/// Every table, in creation order.
pub const ALL: [&str; 3] = [
    CREATE_EVENTS_TABLE,
    CREATE_SNAPSHOTS_TABLE,
    CREATE_STATES_TABLE,
];
