//! Registration store: keyed event and registration records with atomic commits.
//!
//! The store is the only serialization point in the system. Every mutation the
//! engine makes goes through [`RegistrationStore::commit`], which writes the
//! registration and (when seats move) the event's admitted count together, and
//! only if neither record changed since it was read.
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
//! so the engine can hold an `Arc<dyn RegistrationStore>` and swap the
//! in-memory store for Postgres without generics leaking into callers.

use crate::error::Resource;
use crate::types::{Event, EventId, Money, Registration, RegistrationId};
use meetreg_core::version::{Version, Versioned};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRegistrationStore;
pub use postgres::PostgresRegistrationStore;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record changed (or appeared) between read and commit
    #[error("Concurrency conflict on {resource}: expected version {expected:?}, found {actual:?}")]
    ConcurrencyConflict {
        /// Record that moved
        resource: Resource,
        /// Version the writer read (`None` = expected no record)
        expected: Option<Version>,
        /// Version found at commit time (`None` = no record)
        actual: Option<Version>,
    },

    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(Resource),

    /// Commit would push the admitted count past capacity
    #[error("Capacity of event {event_id} ({capacity}) would be exceeded")]
    CapacityExceeded {
        /// Event whose ledger would overflow
        event_id: EventId,
        /// Its capacity
        capacity: u32,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// New admitted count for an event, guarded by the version it was computed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventWrite {
    /// Event to update
    pub event_id: EventId,
    /// Version the count was read at
    pub expected_version: Version,
    /// Admitted count after this commit
    pub admitted_count: u32,
}

/// Registration record to write.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationWrite {
    /// Version read (`None` = the record must not exist yet)
    pub expected_version: Option<Version>,
    /// Full record after this commit
    pub registration: Registration,
}

/// One atomic unit of work.
///
/// `event` is present only when the commit moves the admitted count or when
/// the decision depended on it (admission and seat-claiming transitions). Its
/// version guard is what serializes concurrent admissions for one event.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerCommit {
    /// Event guard and counter update
    pub event: Option<EventWrite>,
    /// Registration write
    pub registration: RegistrationWrite,
}

/// Versions assigned by a successful commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    /// New event version, if the event was written
    pub event_version: Option<Version>,
    /// New registration version
    pub registration_version: Version,
}

/// Persistence for events and registrations.
///
/// Implementations must make [`commit`](Self::commit) atomic: either every
/// write in the [`LedgerCommit`] lands, or none does.
pub trait RegistrationStore: Send + Sync {
    /// Insert or replace an event's descriptive fields.
    ///
    /// The admitted count and cached revenue of an existing record are kept;
    /// a new record starts at zero for both.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] if the new capacity is below the
    ///   current admitted count
    /// - [`StoreError::Database`] if the write fails
    fn save_event(&self, event: Event) -> StoreFuture<'_, Version>;

    /// Load an event with its current version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::Serialization`] on read failure.
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Versioned<Event>>>;

    /// Load a registration with its current version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::Serialization`] on read failure.
    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<Versioned<Registration>>>;

    /// All registrations of an event, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::Serialization`] on read failure.
    fn list_registrations(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>>;

    /// Apply a [`LedgerCommit`] atomically.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConcurrencyConflict`] if either guarded version moved
    /// - [`StoreError::NotFound`] if the event does not exist
    /// - [`StoreError::CapacityExceeded`] if the new count exceeds capacity
    /// - [`StoreError::Database`] on any other failure
    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, CommitOutcome>;

    /// Recompute the event's paid revenue and cache it, without bumping the
    /// event version.
    ///
    /// The sum is read and written in one step, so the cached figure always
    /// reflects the registrations as of the latest refresh to run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the event does not exist.
    fn refresh_cached_revenue(&self, event_id: EventId) -> StoreFuture<'_, Money>;
}
