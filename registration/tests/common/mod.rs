//! Shared fixtures for the registration integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use chrono::{Duration, NaiveDate};
use meetreg_runtime::retry::RetryPolicy;
use meetreg_testing::{ManualClock, init_test_tracing, test_epoch};
use registration::{
    Capacity, Category, EmergencyContact, Event, EventId, EventLifecycle, FeeSchedule, Gender,
    InMemoryProfileProvider, InMemoryRegistrationStore, Money, ParticipantId, ParticipantProfile,
    RecordingNotifier, RegistrationEngine, RegistrationForm, RegistrationStore,
};
use std::sync::Arc;

/// Standard fee.
pub const STANDARD_FEE: u64 = 85;
/// Early-bird fee, valid until `test_epoch() + 7 days`.
pub const EARLY_BIRD_FEE: u64 = 75;

/// An engine over the in-memory store with a controllable clock.
pub struct Harness {
    pub engine: Arc<RegistrationEngine>,
    pub store: Arc<InMemoryRegistrationStore>,
    pub notifier: RecordingNotifier,
    pub profiles: InMemoryProfileProvider,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::new())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        init_test_tracing();
        let store = Arc::new(InMemoryRegistrationStore::new());
        let profiles = InMemoryProfileProvider::new();
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let policy = RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(std::time::Duration::from_millis(1))
            .max_delay(std::time::Duration::from_millis(5))
            .build();
        let engine = RegistrationEngine::new(
            store.clone(),
            clock.clone(),
            Arc::new(notifier.clone()),
            Arc::new(profiles.clone()),
        )
        .with_retry_policy(policy);

        Self {
            engine: Arc::new(engine),
            store,
            notifier,
            profiles,
            clock,
        }
    }

    /// Publish an open event: deadline in 30 days, early bird for 7.
    pub async fn open_event(&self, capacity: u32) -> EventId {
        let event = Event::new(
            EventId::new(),
            "Regional Championship",
            Capacity::new(capacity),
            test_epoch() + Duration::days(30),
            FeeSchedule::with_early_bird(
                Money::from_units(STANDARD_FEE),
                Money::from_units(EARLY_BIRD_FEE),
                test_epoch() + Duration::days(7),
            ),
        )
        .with_lifecycle(EventLifecycle::RegistrationOpen);
        let event_id = event.id;
        self.engine.save_event(event).await.unwrap();
        event_id
    }

    /// A participant with a complete profile.
    pub async fn participant(&self) -> ParticipantId {
        let participant_id = ParticipantId::new();
        self.profiles
            .upsert(ParticipantProfile {
                participant_id,
                date_of_birth: NaiveDate::from_ymd_opt(1998, 11, 2).unwrap(),
                gender: Gender::Male,
                emergency_contact: Some(EmergencyContact {
                    name: "Robin Diaz".into(),
                    phone: "+61 2 5550 1234".into(),
                    relationship: "coach".into(),
                }),
            })
            .await;
        participant_id
    }

    pub async fn admitted_count(&self, event_id: EventId) -> u32 {
        self.engine.get_event(event_id).await.unwrap().admitted_count
    }

    /// The ledger equals the number of seat-holding registrations and never exceeds capacity.
    pub async fn assert_ledger_consistent(&self, event_id: EventId) {
        let event = self.store.load_event(event_id).await.unwrap().unwrap().value;
        let registrations = self.store.list_registrations(event_id).await.unwrap();
        let holding = registrations.iter().filter(|r| r.holds_seat()).count();
        assert_eq!(
            usize::try_from(event.admitted_count).unwrap(),
            holding,
            "admitted_count must equal seat-holding registrations"
        );
        assert!(event.admitted_count <= event.capacity.value());
    }
}

/// A form the standard event accepts.
pub fn form() -> RegistrationForm {
    RegistrationForm::new(Category::new("93kg", "open", "raw")).with_expected_weight(91.5)
}
