//! `PostgreSQL`-backed registration store.
//!
//! # Architecture
//!
//! - **Storage**: one row per event and per registration; the full record lives
//!   in a `JSONB` document, the fields the store must reason about are columns
//! - **Atomicity**: each [`LedgerCommit`] runs in one transaction
//! - **Concurrency**: version-guarded `UPDATE ... WHERE version = $n`; a guard
//!   that matches no row is a conflict, and serialization/deadlock/unique
//!   violations are reported as conflicts too
//! - **Safety net**: `CHECK (admitted_count <= capacity)` on the events table

use super::{
    CommitOutcome, EventWrite, LedgerCommit, RegistrationStore, RegistrationWrite, StoreError,
    StoreFuture,
};
use crate::config::PostgresConfig;
use crate::error::Resource;
use crate::lifecycle::PaymentStatus;
use crate::types::{Event, EventId, Money, Registration, RegistrationId};
use meetreg_core::version::{Version, Versioned};
use meetreg_runtime::metrics::StoreMetrics;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SCHEMA: &str = include_str!("../../migrations/0001_registration.sql");

/// Registration store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: Arc<PgPool>,
}

impl PostgresRegistrationStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    /// Create tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the schema cannot be applied.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to apply schema: {e}")))?;
        Ok(())
    }

    async fn write_event(
        tx: &mut Transaction<'_, Postgres>,
        write: &EventWrite,
    ) -> Result<Version, StoreError> {
        let resource = Resource::Event(write.event_id);
        let updated: Option<(i64,)> = sqlx::query_as(
            "UPDATE events
             SET admitted_count = $1, version = version + 1, updated_at = NOW()
             WHERE id = $2 AND version = $3
             RETURNING version",
        )
        .bind(i64::from(write.admitted_count))
        .bind(write.event_id.as_uuid())
        .bind(to_db_version(write.expected_version)?)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error(e, resource, Some(write.event_id)))?;

        if let Some((version,)) = updated {
            return from_db_version(version);
        }

        // Guard matched nothing: either the event is gone or it moved on.
        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM events WHERE id = $1")
            .bind(write.event_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error(e, resource, None))?;

        match current {
            None => Err(StoreError::NotFound(resource)),
            Some((actual,)) => Err(StoreError::ConcurrencyConflict {
                resource,
                expected: Some(write.expected_version),
                actual: Some(from_db_version(actual)?),
            }),
        }
    }

    async fn write_registration(
        tx: &mut Transaction<'_, Postgres>,
        write: &RegistrationWrite,
    ) -> Result<Version, StoreError> {
        let registration = &write.registration;
        let resource = Resource::Registration(registration.id);
        let fee_cents = to_db_cents(registration.fee)?;

        let written: Option<(i64,)> = match write.expected_version {
            None => sqlx::query_as(
                "INSERT INTO registrations
                     (event_id, participant_id, version, status, payment_status,
                      fee_cents, document, registered_at, updated_at)
                 VALUES ($1, $2, 1, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (event_id, participant_id) DO NOTHING
                 RETURNING version",
            )
            .bind(registration.id.event_id.as_uuid())
            .bind(registration.id.participant_id.as_uuid())
            .bind(registration.status.as_str())
            .bind(registration.payment_status.as_str())
            .bind(fee_cents)
            .bind(Json(registration))
            .bind(registration.registered_at)
            .bind(registration.updated_at)
            .fetch_optional(&mut **tx)
            .await,
            Some(expected) => sqlx::query_as(
                "UPDATE registrations
                 SET version = version + 1, status = $3, payment_status = $4,
                     fee_cents = $5, document = $6, updated_at = $7
                 WHERE event_id = $1 AND participant_id = $2 AND version = $8
                 RETURNING version",
            )
            .bind(registration.id.event_id.as_uuid())
            .bind(registration.id.participant_id.as_uuid())
            .bind(registration.status.as_str())
            .bind(registration.payment_status.as_str())
            .bind(fee_cents)
            .bind(Json(registration))
            .bind(registration.updated_at)
            .bind(to_db_version(expected)?)
            .fetch_optional(&mut **tx)
            .await,
        }
        .map_err(|e| map_sqlx_error(e, resource, None))?;

        match written {
            Some((version,)) => from_db_version(version),
            None => Err(StoreError::ConcurrencyConflict {
                resource,
                expected: write.expected_version,
                actual: None,
            }),
        }
    }
}

impl RegistrationStore for PostgresRegistrationStore {
    fn save_event(&self, event: Event) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let (version,): (i64,) = sqlx::query_as(
                "INSERT INTO events
                     (id, version, capacity, admitted_count, cached_revenue_cents,
                      lifecycle, registration_deadline, document)
                 VALUES ($1, 1, $2, 0, 0, $3, $4, $5)
                 ON CONFLICT (id) DO UPDATE
                 SET version = events.version + 1,
                     capacity = EXCLUDED.capacity,
                     lifecycle = EXCLUDED.lifecycle,
                     registration_deadline = EXCLUDED.registration_deadline,
                     document = EXCLUDED.document,
                     updated_at = NOW()
                 RETURNING version",
            )
            .bind(event.id.as_uuid())
            .bind(i64::from(event.capacity.value()))
            .bind(event.lifecycle.as_str())
            .bind(event.registration_deadline)
            .bind(Json(&event))
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|e| map_sqlx_error(e, Resource::Event(event.id), Some(event.id)))?;

            from_db_version(version)
        })
    }

    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Versioned<Event>>> {
        Box::pin(async move {
            let row: Option<(i64, i32, i64, Json<Event>)> = sqlx::query_as(
                "SELECT version, admitted_count, cached_revenue_cents, document
                 FROM events WHERE id = $1",
            )
            .bind(event_id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load event: {e}")))?;

            row.map(|(version, admitted_count, revenue_cents, Json(mut event))| {
                event.admitted_count = u32::try_from(admitted_count)
                    .map_err(|e| StoreError::Serialization(format!("admitted_count: {e}")))?;
                event.cached_revenue = Money::from_cents(
                    u64::try_from(revenue_cents)
                        .map_err(|e| StoreError::Serialization(format!("cached_revenue: {e}")))?,
                );
                Ok(Versioned::new(event, from_db_version(version)?))
            })
            .transpose()
        })
    }

    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<Versioned<Registration>>> {
        Box::pin(async move {
            let row: Option<(i64, Json<Registration>)> = sqlx::query_as(
                "SELECT version, document FROM registrations
                 WHERE event_id = $1 AND participant_id = $2",
            )
            .bind(registration_id.event_id.as_uuid())
            .bind(registration_id.participant_id.as_uuid())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to load registration: {e}")))?;

            row.map(|(version, Json(registration))| {
                Ok(Versioned::new(registration, from_db_version(version)?))
            })
            .transpose()
        })
    }

    fn list_registrations(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let rows: Vec<(Json<Registration>,)> = sqlx::query_as(
                "SELECT document FROM registrations
                 WHERE event_id = $1
                 ORDER BY registered_at, participant_id",
            )
            .bind(event_id.as_uuid())
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to list registrations: {e}")))?;

            Ok(rows.into_iter().map(|(Json(registration),)| registration).collect())
        })
    }

    #[tracing::instrument(skip(self, commit), fields(registration = %commit.registration.registration.id))]
    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {e}")))?;

            // Dropping `tx` on any early return rolls the transaction back.
            let outcome = async {
                let event_version = match &commit.event {
                    Some(write) => Some(Self::write_event(&mut tx, write).await?),
                    None => None,
                };
                let registration_version =
                    Self::write_registration(&mut tx, &commit.registration).await?;
                Ok::<_, StoreError>(CommitOutcome {
                    event_version,
                    registration_version,
                })
            }
            .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(error) => {
                    if matches!(error, StoreError::ConcurrencyConflict { .. }) {
                        StoreMetrics::record_conflict();
                    }
                    return Err(error);
                },
            };

            let event_id = commit.registration.registration.id.event_id;
            tx.commit().await.map_err(|e| {
                map_sqlx_error(e, Resource::Registration(commit.registration.registration.id), Some(event_id))
            })?;

            StoreMetrics::record_commit(started.elapsed());
            Ok(outcome)
        })
    }

    fn refresh_cached_revenue(&self, event_id: EventId) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            // Sum and write in one statement; the row lock orders concurrent refreshes.
            let revenue_cents: Option<i64> = sqlx::query_scalar(
                "UPDATE events
                 SET cached_revenue_cents = (
                     SELECT COALESCE(SUM(fee_cents), 0) FROM registrations
                     WHERE event_id = $1 AND payment_status = $2
                 )
                 WHERE id = $1
                 RETURNING cached_revenue_cents",
            )
            .bind(event_id.as_uuid())
            .bind(PaymentStatus::Paid.as_str())
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Database(format!("Failed to refresh revenue: {e}")))?;

            let revenue_cents =
                revenue_cents.ok_or(StoreError::NotFound(Resource::Event(event_id)))?;
            u64::try_from(revenue_cents)
                .map(Money::from_cents)
                .map_err(|e| StoreError::Serialization(format!("cached_revenue: {e}")))
        })
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn to_db_version(version: Version) -> Result<i64, StoreError> {
    i64::try_from(version.value()).map_err(|e| StoreError::Serialization(format!("version: {e}")))
}

fn from_db_version(version: i64) -> Result<Version, StoreError> {
    u64::try_from(version)
        .map(Version::new)
        .map_err(|e| StoreError::Serialization(format!("version: {e}")))
}

fn to_db_cents(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents()).map_err(|e| StoreError::Serialization(format!("amount: {e}")))
}

/// Map driver errors onto store errors.
///
/// Serialization failures, deadlocks and unique violations mean another writer
/// got there first; a failed check constraint means the ledger would overflow.
fn map_sqlx_error(error: sqlx::Error, resource: Resource, event_id: Option<EventId>) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        match db_error.code().as_deref() {
            Some("40001" | "40P01" | "23505") => {
                return StoreError::ConcurrencyConflict {
                    resource,
                    expected: None,
                    actual: None,
                };
            },
            Some("23514") => {
                if let Some(event_id) = event_id {
                    return StoreError::CapacityExceeded {
                        event_id,
                        capacity: 0,
                    };
                }
            },
            Some("23503") => {
                if let Some(event_id) = event_id {
                    return StoreError::NotFound(Resource::Event(event_id));
                }
            },
            _ => {},
        }
    }
    StoreError::Database(error.to_string())
}
