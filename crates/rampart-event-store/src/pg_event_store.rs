//! `PostgreSQL` implementation of the event, snapshot and state stores.
//!
//! Appends run in one transaction that first takes a transaction-scoped
//! advisory lock on the aggregate id, so writers to the same stream
//! serialize while writers to different streams proceed in parallel. The
//! `UNIQUE (aggregate_id, version)` constraint backs the version check
//! against writers that bypass the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rampart_core::aggregate::AggregateId;
use rampart_core::error::DomainError;
use rampart_core::event::{Issuer, StoredEvent};
use rampart_core::event_store::{EventStore, SnapshotStore, validate_batch, validate_compaction};
use rampart_core::snapshot::Snapshot;
use rampart_core::state::{StateRecord, StateStore};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::schema;

/// PostgreSQL-backed event, snapshot and state store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if a statement fails.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for statement in schema::ALL {
            sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

struct StreamHead {
    first_version: Option<i64>,
    last_version: i64,
    aggregate_type: Option<String>,
}

async fn lock_stream(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: &AggregateId,
) -> Result<(), DomainError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(aggregate_id.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_stream", e))?;
    Ok(())
}

async fn stream_head<'e, E>(executor: E, aggregate_id: &AggregateId) -> Result<StreamHead, DomainError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r"
        SELECT
            MIN(version) AS first_version,
            MAX(version) AS last_version,
            MIN(aggregate_type) AS aggregate_type
        FROM domain_events
        WHERE aggregate_id = $1
        ",
    )
    .bind(aggregate_id.as_str())
    .fetch_one(executor)
    .await
    .map_err(|e| map_sqlx_error("stream_head", e))?;

    let read = |e: sqlx::Error| map_sqlx_error("stream_head", e);
    let first_version: Option<i64> = row.try_get("first_version").map_err(read)?;
    let last_version: Option<i64> = row.try_get("last_version").map_err(read)?;
    let aggregate_type: Option<String> = row.try_get("aggregate_type").map_err(read)?;

    Ok(StreamHead {
        first_version,
        last_version: last_version.unwrap_or(0),
        aggregate_type,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(
        skip(self, events),
        fields(aggregate_id = %aggregate_id, event_count = events.len()),
        err
    )]
    async fn save_events(
        &self,
        aggregate_id: &AggregateId,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(aggregate_id, events, expected_version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        lock_stream(&mut tx, aggregate_id).await?;

        let head = stream_head(&mut *tx, aggregate_id).await?;
        if head.last_version != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: aggregate_id.clone(),
                expected: expected_version,
                actual: head.last_version,
            });
        }
        if let Some(existing) = head.aggregate_type {
            if existing != events[0].aggregate_type {
                return Err(DomainError::Validation(format!(
                    "stream {aggregate_id} holds {existing} events, attempted append of {}",
                    events[0].aggregate_type
                )));
            }
        }

        for event in events {
            sqlx::query(
                r"
                INSERT INTO domain_events (
                    event_id, aggregate_id, aggregate_type, version, event_type,
                    payload, occurred_at, issuer_id, issuer_type, correlation_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_str())
            .bind(&event.aggregate_type)
            .bind(event.version)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.occurred_at)
            .bind(event.issuer.as_ref().map(|i| i.id.as_str()))
            .bind(event.issuer.as_ref().map(|i| i.kind.as_str()))
            .bind(event.correlation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DomainError::ConcurrencyConflict {
                        aggregate_id: aggregate_id.clone(),
                        expected: expected_version,
                        actual: event.version,
                    }
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(expected_version, "appended events");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_event_history(
        &self,
        aggregate_id: &AggregateId,
        aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let head = stream_head(&self.pool, aggregate_id).await?;
        let Some(stored_type) = head.aggregate_type else {
            if from_version <= 1 {
                return Ok(Vec::new());
            }
            return Err(DomainError::AggregateNotFound(aggregate_id.clone()));
        };
        if stored_type != aggregate_type {
            return Err(DomainError::AggregateNotFound(aggregate_id.clone()));
        }

        let from_version = from_version.max(1);
        if let Some(first) = head.first_version {
            if from_version < first {
                return Err(DomainError::HistoryCompacted {
                    aggregate_id: aggregate_id.clone(),
                    first_available: first,
                });
            }
        }

        let rows = sqlx::query(
            r"
            SELECT
                event_id, aggregate_id, aggregate_type, version, event_type,
                payload, occurred_at, issuer_id, issuer_type, correlation_id
            FROM domain_events
            WHERE aggregate_id = $1 AND version >= $2
            ORDER BY version ASC
            ",
        )
        .bind(aggregate_id.as_str())
        .bind(from_version)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_event_history", e))?;

        rows.iter()
            .map(|row| event_from_row(row).map_err(|e| map_sqlx_error("decode_event_row", e)))
            .collect()
    }

    async fn get_last_event_version(&self, aggregate_id: &AggregateId) -> Result<i64, DomainError> {
        Ok(stream_head(&self.pool, aggregate_id).await?.last_version)
    }
}

#[async_trait]
impl SnapshotStore for PgEventStore {
    #[instrument(
        skip(self, snapshot),
        fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version),
        err
    )]
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO aggregate_snapshots (aggregate_id, aggregate_type, version, state, taken_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id, version)
            DO UPDATE SET state = EXCLUDED.state, taken_at = EXCLUDED.taken_at
            ",
        )
        .bind(snapshot.aggregate_id.as_str())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.state)
        .bind(snapshot.taken_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_snapshot", e))?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT aggregate_id, aggregate_type, version, state, taken_at
            FROM aggregate_snapshots
            WHERE aggregate_id = $1
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_snapshot", e))?;

        row.as_ref()
            .map(snapshot_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_snapshot_row", e))
    }

    #[instrument(skip(self), err)]
    async fn compact_events(
        &self,
        aggregate_id: &AggregateId,
        keep_from_version: i64,
    ) -> Result<usize, DomainError> {
        let snapshot = self.get_snapshot(aggregate_id).await?;
        validate_compaction(aggregate_id, snapshot.as_ref(), keep_from_version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        lock_stream(&mut tx, aggregate_id).await?;

        let removed = sqlx::query("DELETE FROM domain_events WHERE aggregate_id = $1 AND version < $2")
            .bind(aggregate_id.as_str())
            .bind(keep_from_version)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("compact_events", e))?
            .rows_affected();

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(removed, "compacted stream");
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }
}

#[async_trait]
impl StateStore for PgEventStore {
    async fn load_state(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<StateRecord>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT aggregate_id, aggregate_type, version, state, state_hash, updated_at
            FROM aggregate_states
            WHERE aggregate_id = $1
            ",
        )
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_state", e))?;

        row.as_ref()
            .map(state_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("decode_state_row", e))
    }

    #[instrument(
        skip(self, record),
        fields(aggregate_id = %record.aggregate_id, version = record.version),
        err
    )]
    async fn save_state(
        &self,
        record: StateRecord,
        expected_version: i64,
    ) -> Result<(), DomainError> {
        let written = if expected_version == 0 {
            sqlx::query(
                r"
                INSERT INTO aggregate_states
                    (aggregate_id, aggregate_type, version, state, state_hash, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (aggregate_id) DO NOTHING
                ",
            )
            .bind(record.aggregate_id.as_str())
            .bind(&record.aggregate_type)
            .bind(record.version)
            .bind(&record.state)
            .bind(&record.state_hash)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE aggregate_states
                SET version = $3, state = $4, state_hash = $5, updated_at = $6
                WHERE aggregate_id = $1 AND version = $2
                ",
            )
            .bind(record.aggregate_id.as_str())
            .bind(expected_version)
            .bind(record.version)
            .bind(&record.state)
            .bind(&record.state_hash)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
        }
        .map_err(|e| map_sqlx_error("save_state", e))?;

        if written.rows_affected() == 0 {
            let actual = self
                .load_state(&record.aggregate_id)
                .await?
                .map_or(0, |r| r.version);
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: record.aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        Ok(())
    }
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    let issuer_id: Option<String> = row.try_get("issuer_id")?;
    let issuer_type: Option<String> = row.try_get("issuer_type")?;
    let aggregate_id: String = row.try_get("aggregate_id")?;
    Ok(StoredEvent {
        event_id: row.try_get::<Uuid, _>("event_id")?,
        aggregate_id: AggregateId::from(aggregate_id),
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        version: row.try_get("version")?,
        payload: row.try_get("payload")?,
        occurred_at: row.try_get::<DateTime<Utc>, _>("occurred_at")?,
        issuer: issuer_id
            .zip(issuer_type)
            .map(|(id, kind)| Issuer::new(id, kind)),
        correlation_id: row.try_get("correlation_id")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, sqlx::Error> {
    let aggregate_id: String = row.try_get("aggregate_id")?;
    Ok(Snapshot {
        aggregate_id: AggregateId::from(aggregate_id),
        aggregate_type: row.try_get("aggregate_type")?,
        version: row.try_get("version")?,
        state: row.try_get("state")?,
        taken_at: row.try_get("taken_at")?,
    })
}

fn state_from_row(row: &PgRow) -> Result<StateRecord, sqlx::Error> {
    let aggregate_id: String = row.try_get("aggregate_id")?;
    Ok(StateRecord {
        aggregate_id: AggregateId::from(aggregate_id),
        aggregate_type: row.try_get("aggregate_type")?,
        version: row.try_get("version")?,
        state: row.try_get("state")?,
        state_hash: row.try_get("state_hash")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => DomainError::Infrastructure(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            DomainError::Infrastructure(format!("connection pool closed in {operation}"))
        }
        other => DomainError::Infrastructure(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().is_some_and(|code| code.as_ref() == "23505");
    }
    false
}
