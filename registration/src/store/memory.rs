//! In-memory registration store for tests, demos and single-process use.
//!
//! A single `RwLock` guards both maps, so every commit is trivially atomic and
//! the version checks behave exactly like the Postgres store's guarded updates.

use super::{
    CommitOutcome, LedgerCommit, RegistrationStore, StoreError, StoreFuture,
};
use crate::error::Resource;
use crate::stats::paid_revenue;
use crate::types::{Event, EventId, Money, Registration, RegistrationId};
use meetreg_core::version::{Version, Versioned};
use meetreg_runtime::metrics::StoreMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    events: HashMap<EventId, Versioned<Event>>,
    registrations: HashMap<RegistrationId, Versioned<Registration>>,
    // Insertion order per event, for stable listings
    order: HashMap<EventId, Vec<RegistrationId>>,
}

/// Registration store backed by process memory.
#[derive(Default)]
pub struct InMemoryRegistrationStore {
    tables: RwLock<Tables>,
    injected_conflicts: AtomicUsize,
    commits: AtomicUsize,
}

impl InMemoryRegistrationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a conflict, as if another
    /// writer had won the race each time.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of commits that succeeded.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn save_event(&self, mut event: Event) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let version = match tables.events.get(&event.id) {
                Some(existing) => {
                    if event.capacity.value() < existing.value.admitted_count {
                        return Err(StoreError::CapacityExceeded {
                            event_id: event.id,
                            capacity: event.capacity.value(),
                        });
                    }
                    event.admitted_count = existing.value.admitted_count;
                    event.cached_revenue = existing.value.cached_revenue;
                    existing.version.next()
                },
                None => {
                    event.admitted_count = 0;
                    event.cached_revenue = Money::ZERO;
                    Version::FIRST
                },
            };
            tables.events.insert(event.id, Versioned::new(event, version));
            Ok(version)
        })
    }

    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Versioned<Event>>> {
        Box::pin(async move { Ok(self.tables.read().await.events.get(&event_id).cloned()) })
    }

    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<Versioned<Registration>>> {
        Box::pin(async move {
            Ok(self
                .tables
                .read()
                .await
                .registrations
                .get(&registration_id)
                .cloned())
        })
    }

    fn list_registrations(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            let registrations = tables
                .order
                .get(&event_id)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.registrations.get(id))
                .map(|versioned| versioned.value.clone())
                .collect();
            Ok(registrations)
        })
    }

    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let mut tables = self.tables.write().await;
            let registration_id = commit.registration.registration.id;

            if self.take_injected_conflict() {
                StoreMetrics::record_conflict();
                return Err(StoreError::ConcurrencyConflict {
                    resource: Resource::Registration(registration_id),
                    expected: commit.registration.expected_version,
                    actual: None,
                });
            }

            // Validate the whole read set before writing anything.
            if let Some(write) = &commit.event {
                let current = tables
                    .events
                    .get(&write.event_id)
                    .ok_or(StoreError::NotFound(Resource::Event(write.event_id)))?;
                if current.version != write.expected_version {
                    StoreMetrics::record_conflict();
                    return Err(StoreError::ConcurrencyConflict {
                        resource: Resource::Event(write.event_id),
                        expected: Some(write.expected_version),
                        actual: Some(current.version),
                    });
                }
                let capacity = current.value.capacity.value();
                if write.admitted_count > capacity {
                    return Err(StoreError::CapacityExceeded {
                        event_id: write.event_id,
                        capacity,
                    });
                }
            }

            let current_registration = tables
                .registrations
                .get(&registration_id)
                .map(|versioned| versioned.version);
            if current_registration != commit.registration.expected_version {
                StoreMetrics::record_conflict();
                return Err(StoreError::ConcurrencyConflict {
                    resource: Resource::Registration(registration_id),
                    expected: commit.registration.expected_version,
                    actual: current_registration,
                });
            }

            let mut event_version = None;
            if let Some(write) = commit.event {
                if let Some(event) = tables.events.get_mut(&write.event_id) {
                    event.value.admitted_count = write.admitted_count;
                    event.version = event.version.next();
                    event_version = Some(event.version);
                }
            }

            let registration_version = current_registration.map_or(Version::FIRST, Version::next);
            if current_registration.is_none() {
                tables
                    .order
                    .entry(registration_id.event_id)
                    .or_default()
                    .push(registration_id);
            }
            tables.registrations.insert(
                registration_id,
                Versioned::new(commit.registration.registration, registration_version),
            );

            self.commits.fetch_add(1, Ordering::SeqCst);
            StoreMetrics::record_commit(started.elapsed());
            Ok(CommitOutcome {
                event_version,
                registration_version,
            })
        })
    }

    fn refresh_cached_revenue(&self, event_id: EventId) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            let revenue = paid_revenue(
                tables
                    .order
                    .get(&event_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| tables.registrations.get(id))
                    .map(|versioned| &versioned.value),
            );
            let event = tables
                .events
                .get_mut(&event_id)
                .ok_or(StoreError::NotFound(Resource::Event(event_id)))?;
            event.value.cached_revenue = revenue;
            Ok(revenue)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fee::FeeSchedule;
    use crate::lifecycle::{PaymentStatus, RegistrationStatus};
    use crate::store::{EventWrite, RegistrationWrite};
    use crate::types::{
        Capacity, Category, EmergencyContact, EventLifecycle, Gender, ParticipantId,
        PersonalDetails,
    };
    use chrono::NaiveDate;
    use meetreg_testing::test_epoch;

    fn event(capacity: u32) -> Event {
        Event::new(
            EventId::new(),
            "Club Classic",
            Capacity::new(capacity),
            test_epoch(),
            FeeSchedule::flat(Money::from_units(40)),
        )
        .with_lifecycle(EventLifecycle::RegistrationOpen)
    }

    fn registration(event_id: EventId) -> Registration {
        Registration {
            id: RegistrationId::new(event_id, ParticipantId::new()),
            category: Category::new("74kg", "open", "raw"),
            personal: PersonalDetails {
                date_of_birth: NaiveDate::from_ymd_opt(1995, 4, 2).unwrap(),
                gender: Gender::Male,
            },
            emergency_contact: EmergencyContact {
                name: "Sam Doe".into(),
                phone: "555-0100".into(),
                relationship: "sibling".into(),
            },
            membership: None,
            coach: None,
            team: None,
            status: RegistrationStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            fee: Money::from_units(40),
            expected_weight_kg: None,
            flight: None,
            platform: None,
            weigh_in: None,
            notes: None,
            withdrawal_reason: None,
            history: Vec::new(),
            registered_at: test_epoch(),
            updated_at: test_epoch(),
        }
    }

    fn admission(event_version: Version, event_id: EventId, count: u32) -> LedgerCommit {
        LedgerCommit {
            event: Some(EventWrite {
                event_id,
                expected_version: event_version,
                admitted_count: count,
            }),
            registration: RegistrationWrite {
                expected_version: None,
                registration: registration(event_id),
            },
        }
    }

    #[tokio::test]
    async fn save_event_resets_ledger_on_insert_and_keeps_it_on_update() {
        let store = InMemoryRegistrationStore::new();
        let mut seeded = event(5);
        seeded.admitted_count = 4;
        let v1 = store.save_event(seeded.clone()).await.unwrap();
        assert_eq!(v1, Version::FIRST);
        assert_eq!(store.load_event(seeded.id).await.unwrap().unwrap().value.admitted_count, 0);

        store.commit(admission(v1, seeded.id, 1)).await.unwrap();

        seeded.name = "Club Classic 2025".into();
        seeded.admitted_count = 0;
        let v3 = store.save_event(seeded.clone()).await.unwrap();
        let loaded = store.load_event(seeded.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, v3);
        assert_eq!(loaded.value.name, "Club Classic 2025");
        assert_eq!(loaded.value.admitted_count, 1);
    }

    #[tokio::test]
    async fn commit_applies_both_writes() {
        let store = InMemoryRegistrationStore::new();
        let event = event(2);
        let version = store.save_event(event.clone()).await.unwrap();

        let commit = admission(version, event.id, 1);
        let registration_id = commit.registration.registration.id;
        let outcome = store.commit(commit).await.unwrap();

        assert_eq!(outcome.event_version, Some(version.next()));
        assert_eq!(outcome.registration_version, Version::FIRST);
        assert_eq!(store.load_event(event.id).await.unwrap().unwrap().value.admitted_count, 1);
        assert!(store.load_registration(registration_id).await.unwrap().is_some());
        assert_eq!(store.list_registrations(event.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_event_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryRegistrationStore::new();
        let event = event(2);
        let version = store.save_event(event.clone()).await.unwrap();
        store.commit(admission(version, event.id, 1)).await.unwrap();

        let stale = admission(version, event.id, 1);
        let registration_id = stale.registration.registration.id;
        let result = store.commit(stale).await;

        assert!(matches!(result, Err(StoreError::ConcurrencyConflict { .. })));
        assert!(store.load_registration(registration_id).await.unwrap().is_none());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let store = InMemoryRegistrationStore::new();
        let event = event(2);
        let version = store.save_event(event.clone()).await.unwrap();

        let first = admission(version, event.id, 1);
        let mut second = first.clone();
        store.commit(first).await.unwrap();
        second.event = None;

        assert!(matches!(
            store.commit(second).await,
            Err(StoreError::ConcurrencyConflict { actual: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn count_above_capacity_is_refused() {
        let store = InMemoryRegistrationStore::new();
        let event = event(1);
        let version = store.save_event(event.clone()).await.unwrap();

        assert!(matches!(
            store.commit(admission(version, event.id, 2)).await,
            Err(StoreError::CapacityExceeded { capacity: 1, .. })
        ));
    }

    #[tokio::test]
    async fn injected_conflicts_are_consumed() {
        let store = InMemoryRegistrationStore::new();
        let event = event(3);
        let version = store.save_event(event.clone()).await.unwrap();
        store.inject_conflicts(1);

        assert!(store.commit(admission(version, event.id, 1)).await.is_err());
        assert!(store.commit(admission(version, event.id, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn shrinking_capacity_below_admitted_count_is_refused() {
        let store = InMemoryRegistrationStore::new();
        let mut event = event(3);
        let version = store.save_event(event.clone()).await.unwrap();
        store.commit(admission(version, event.id, 2)).await.unwrap();

        event.capacity = Capacity::new(1);
        assert!(matches!(
            store.save_event(event.clone()).await,
            Err(StoreError::CapacityExceeded { capacity: 1, .. })
        ));
        let loaded = store.load_event(event.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, version.next());
        assert_eq!(loaded.value.capacity, Capacity::new(3));

        event.capacity = Capacity::new(2);
        assert!(store.save_event(event).await.is_ok());
    }

    #[tokio::test]
    async fn cached_revenue_refresh_sums_paid_fees_without_bumping_version() {
        let store = InMemoryRegistrationStore::new();
        let event = event(3);
        let version = store.save_event(event.clone()).await.unwrap();

        let mut paid = admission(version, event.id, 1);
        paid.registration.registration.payment_status = PaymentStatus::Paid;
        store.commit(paid).await.unwrap();
        store.commit(admission(version.next(), event.id, 2)).await.unwrap();

        let revenue = store.refresh_cached_revenue(event.id).await.unwrap();
        assert_eq!(revenue, Money::from_units(40));
        let loaded = store.load_event(event.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, version.next().next());
        assert_eq!(loaded.value.cached_revenue, Money::from_units(40));

        assert!(matches!(
            store.refresh_cached_revenue(EventId::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
