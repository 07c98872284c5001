//! Lifecycle tests: status transitions, payments, weigh-ins, flights,
//! notification failures, retries and statistics.
//!
//! Run with: `cargo test --test lifecycle_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

mod common;

use common::{EARLY_BIRD_FEE, Harness, STANDARD_FEE, form};
use meetreg_core::version::{Version, Versioned};
use registration::notifier::Notification;
use registration::store::{CommitOutcome, LedgerCommit, StoreFuture};
use registration::{
    Event, EventId, InMemoryRegistrationStore, Money, PaymentStatus, RecordingNotifier,
    Registration, RegistrationEngine, RegistrationError, RegistrationId, RegistrationStatus,
    RegistrationStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// ============================================================================
// Status transitions
// ============================================================================

#[tokio::test]
async fn full_review_path_keeps_the_seat() {
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();

    let approved = harness
        .engine
        .transition(id, RegistrationStatus::Approved, Some("documents verified".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, RegistrationStatus::Approved);
    assert_eq!(approved.notes.as_deref(), Some("documents verified"));

    let checked_in = harness
        .engine
        .transition(id, RegistrationStatus::CheckedIn, None)
        .await
        .unwrap();
    assert_eq!(checked_in.status, RegistrationStatus::CheckedIn);
    assert_eq!(checked_in.history.len(), 3);
    assert_eq!(harness.admitted_count(event_id).await, 1);
}

#[tokio::test]
async fn illegal_transitions_are_refused_without_changes() {
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();
    let commits = harness.store.commit_count();

    for to in [RegistrationStatus::Pending, RegistrationStatus::CheckedIn, RegistrationStatus::Waitlisted] {
        assert_eq!(
            harness.engine.transition(id, to, None).await,
            Err(RegistrationError::InvalidTransition {
                from: RegistrationStatus::Pending,
                to,
            })
        );
    }

    harness.engine.transition(id, RegistrationStatus::Rejected, None).await.unwrap();
    assert_eq!(
        harness.engine.transition(id, RegistrationStatus::Approved, None).await,
        Err(RegistrationError::InvalidTransition {
            from: RegistrationStatus::Rejected,
            to: RegistrationStatus::Approved,
        })
    );
    assert_eq!(harness.store.commit_count(), commits + 1);
    assert_eq!(harness.admitted_count(event_id).await, 0);
}

#[tokio::test]
async fn withdrawal_releases_exactly_what_admission_took() {
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    let (seated, waiting) = (harness.participant().await, harness.participant().await);
    let filler = harness.participant().await;
    harness.engine.admit(event_id, seated, form()).await.unwrap();
    harness.engine.admit(event_id, filler, form()).await.unwrap();
    harness.engine.admit(event_id, waiting, form()).await.unwrap();
    assert_eq!(harness.admitted_count(event_id).await, 2);

    // A waitlisted withdrawal gives nothing back.
    let withdrawn = harness
        .engine
        .withdraw(event_id, waiting, Some("changed plans".into()))
        .await
        .unwrap();
    assert_eq!(withdrawn.withdrawal_reason.as_deref(), Some("changed plans"));
    assert_eq!(harness.admitted_count(event_id).await, 2);

    // A seated withdrawal gives back one seat.
    harness.engine.withdraw(event_id, seated, None).await.unwrap();
    assert_eq!(harness.admitted_count(event_id).await, 1);

    // Withdrawing twice is an illegal transition.
    assert_eq!(
        harness.engine.withdraw(event_id, seated, None).await,
        Err(RegistrationError::InvalidTransition {
            from: RegistrationStatus::Withdrawn,
            to: RegistrationStatus::Withdrawn,
        })
    );
    harness.assert_ledger_consistent(event_id).await;
}

#[tokio::test]
async fn self_withdrawal_keeps_the_organizer_notes() {
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();
    harness
        .engine
        .transition(id, RegistrationStatus::Approved, Some("medical certificate on file".into()))
        .await
        .unwrap();

    let withdrawn = harness
        .engine
        .withdraw(event_id, participant, Some("injured in training".into()))
        .await
        .unwrap();

    assert_eq!(withdrawn.notes.as_deref(), Some("medical certificate on file"));
    assert_eq!(withdrawn.withdrawal_reason.as_deref(), Some("injured in training"));
    assert_eq!(
        withdrawn.history.last().and_then(|change| change.notes.as_deref()),
        Some("injured in training")
    );
    let stored = harness.engine.get_registration(id).await.unwrap();
    assert_eq!(stored.notes.as_deref(), Some("medical certificate on file"));
}

#[tokio::test]
async fn waitlisted_approval_into_a_full_event_is_refused() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let (first, second) = (harness.participant().await, harness.participant().await);
    harness.engine.admit(event_id, first, form()).await.unwrap();
    harness.engine.admit(event_id, second, form()).await.unwrap();

    let result = harness
        .engine
        .transition(RegistrationId::new(event_id, second), RegistrationStatus::Approved, None)
        .await;

    assert_eq!(result, Err(RegistrationError::CapacityExhausted { capacity: 1 }));
    let still_waiting = harness
        .engine
        .get_registration(RegistrationId::new(event_id, second))
        .await
        .unwrap();
    assert_eq!(still_waiting.status, RegistrationStatus::Waitlisted);
    assert_eq!(harness.admitted_count(event_id).await, 1);
}

#[tokio::test]
async fn unknown_registration_is_not_found() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);

    let result = harness.engine.transition(id, RegistrationStatus::Approved, None).await;

    assert_eq!(
        result,
        Err(RegistrationError::NotFound(registration::Resource::Registration(id)))
    );
}

#[tokio::test]
async fn status_changes_are_notified() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();
    harness.engine.transition(id, RegistrationStatus::Approved, None).await.unwrap();
    harness.engine.flush_effects().await;

    let notifications = harness.notifier.notifications().await;
    assert!(notifications.contains(&Notification::StatusChanged {
        registration_id: id,
        from: RegistrationStatus::Pending,
        to: RegistrationStatus::Approved,
    }));
}

// ============================================================================
// Payments
// ============================================================================

#[tokio::test]
async fn payment_changes_refresh_cached_revenue() {
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    harness.clock.advance(chrono::Duration::days(8));
    let (payer, partial) = (harness.participant().await, harness.participant().await);
    harness.engine.admit(event_id, payer, form()).await.unwrap();
    harness.engine.admit(event_id, partial, form()).await.unwrap();

    let paid = harness
        .engine
        .update_payment_status(RegistrationId::new(event_id, payer), PaymentStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    harness
        .engine
        .update_payment_status(RegistrationId::new(event_id, partial), PaymentStatus::Partial)
        .await
        .unwrap();
    harness.engine.flush_effects().await;

    let event = harness.engine.get_event(event_id).await.unwrap();
    assert_eq!(event.cached_revenue, Money::from_units(STANDARD_FEE));
    assert_eq!(harness.admitted_count(event_id).await, 2);
}

/// Store whose first revenue refresh stalls, so it finishes after later ones.
struct StalledRefreshStore {
    inner: Arc<InMemoryRegistrationStore>,
    stalled: AtomicBool,
}

impl RegistrationStore for StalledRefreshStore {
    fn save_event(&self, event: Event) -> StoreFuture<'_, Version> {
        self.inner.save_event(event)
    }

    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<Versioned<Event>>> {
        self.inner.load_event(event_id)
    }

    fn load_registration(
        &self,
        registration_id: RegistrationId,
    ) -> StoreFuture<'_, Option<Versioned<Registration>>> {
        self.inner.load_registration(registration_id)
    }

    fn list_registrations(&self, event_id: EventId) -> StoreFuture<'_, Vec<Registration>> {
        self.inner.list_registrations(event_id)
    }

    fn commit(&self, commit: LedgerCommit) -> StoreFuture<'_, CommitOutcome> {
        self.inner.commit(commit)
    }

    fn refresh_cached_revenue(&self, event_id: EventId) -> StoreFuture<'_, Money> {
        Box::pin(async move {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.inner.refresh_cached_revenue(event_id).await
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_revenue_refresh_does_not_overwrite_a_newer_total() {
    println!("🧪 Revenue: first refresh lands after the second payment");
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    let (first, second) = (harness.participant().await, harness.participant().await);
    harness.engine.admit(event_id, first, form()).await.unwrap();
    harness.engine.admit(event_id, second, form()).await.unwrap();

    let store = Arc::new(StalledRefreshStore {
        inner: harness.store.clone(),
        stalled: AtomicBool::new(false),
    });
    let engine = RegistrationEngine::new(
        store,
        harness.clock.clone(),
        Arc::new(harness.notifier.clone()),
        Arc::new(harness.profiles.clone()),
    );

    engine
        .update_payment_status(RegistrationId::new(event_id, first), PaymentStatus::Paid)
        .await
        .unwrap();
    engine
        .update_payment_status(RegistrationId::new(event_id, second), PaymentStatus::Paid)
        .await
        .unwrap();
    engine.flush_effects().await;

    let event = engine.get_event(event_id).await.unwrap();
    let stats = engine.get_stats(event_id).await.unwrap();
    println!("  📊 cached={} paid={}", event.cached_revenue, stats.total_revenue);
    assert_eq!(stats.total_revenue, Money::from_units(2 * EARLY_BIRD_FEE));
    assert_eq!(event.cached_revenue, stats.total_revenue);
    println!("  ✓ Cached revenue matches paid fees");
}

#[tokio::test]
async fn refund_after_withdrawal_is_allowed() {
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();
    harness.engine.update_payment_status(id, PaymentStatus::Paid).await.unwrap();
    harness.engine.withdraw(event_id, participant, None).await.unwrap();

    let refunded = harness
        .engine
        .update_payment_status(id, PaymentStatus::Refunded)
        .await
        .unwrap();
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);

    harness.engine.flush_effects().await;
    assert_eq!(harness.engine.get_event(event_id).await.unwrap().cached_revenue, Money::ZERO);
}

#[tokio::test]
async fn illegal_payment_transitions_are_refused() {
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();

    assert_eq!(
        harness.engine.update_payment_status(id, PaymentStatus::Refunded).await,
        Err(RegistrationError::InvalidPaymentTransition {
            from: PaymentStatus::Unpaid,
            to: PaymentStatus::Refunded,
        })
    );
    harness.engine.update_payment_status(id, PaymentStatus::Waived).await.unwrap();
    assert_eq!(
        harness.engine.update_payment_status(id, PaymentStatus::Paid).await,
        Err(RegistrationError::InvalidPaymentTransition {
            from: PaymentStatus::Waived,
            to: PaymentStatus::Paid,
        })
    );
}

// ============================================================================
// Weigh-ins and flights
// ============================================================================

#[tokio::test]
async fn weigh_in_requires_approval_and_corrections_need_a_note() {
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();

    assert_eq!(
        harness.engine.record_weigh_in(id, 92.4, true, None).await,
        Err(RegistrationError::WeighInNotAllowed(RegistrationStatus::Pending))
    );

    harness.engine.transition(id, RegistrationStatus::Approved, None).await.unwrap();
    let first = harness.engine.record_weigh_in(id, 92.4, true, None).await.unwrap();
    let weigh_in = first.weigh_in.unwrap();
    assert!(weigh_in.passed);
    assert_eq!(weigh_in.corrections, 0);

    assert_eq!(
        harness.engine.record_weigh_in(id, 93.6, false, None).await,
        Err(RegistrationError::WeighInAlreadyRecorded)
    );

    let corrected = harness
        .engine
        .record_weigh_in(id, 93.6, false, Some("scale recalibrated".into()))
        .await
        .unwrap();
    let weigh_in = corrected.weigh_in.unwrap();
    assert!(!weigh_in.passed);
    assert!((weigh_in.actual_weight_kg - 93.6).abs() < f64::EPSILON);
    assert_eq!(weigh_in.corrections, 1);
    assert_eq!(weigh_in.notes.as_deref(), Some("scale recalibrated"));

    assert!(matches!(
        harness.engine.record_weigh_in(id, -1.0, true, Some("typo".into())).await,
        Err(RegistrationError::Validation(_))
    ));
}

#[tokio::test]
async fn flights_are_assigned_to_admitted_lifters_only() {
    let harness = Harness::new();
    let event_id = harness.open_event(3).await;
    let participant = harness.participant().await;
    let id = RegistrationId::new(event_id, participant);
    harness.engine.admit(event_id, participant, form()).await.unwrap();

    assert_eq!(
        harness.engine.assign_flight(id, "A".into(), Some(1)).await,
        Err(RegistrationError::FlightAssignmentNotAllowed(RegistrationStatus::Pending))
    );

    harness.engine.transition(id, RegistrationStatus::Approved, None).await.unwrap();
    let placed = harness.engine.assign_flight(id, "B".into(), Some(2)).await.unwrap();
    assert_eq!(placed.flight.as_deref(), Some("B"));
    assert_eq!(placed.platform, Some(2));

    assert!(matches!(
        harness.engine.assign_flight(id, "   ".into(), None).await,
        Err(RegistrationError::Validation(_))
    ));
}

// ============================================================================
// Failures around the commit
// ============================================================================

#[tokio::test]
async fn notifier_failure_does_not_fail_admission() {
    let harness = Harness::with_notifier(RecordingNotifier::failing());
    let event_id = harness.open_event(1).await;
    let participant = harness.participant().await;

    let registration = harness.engine.admit(event_id, participant, form()).await.unwrap();
    harness.engine.flush_effects().await;

    assert_eq!(registration.status, RegistrationStatus::Pending);
    assert_eq!(harness.notifier.attempts(), 1);
    assert_eq!(harness.notifier.notifications().await.len(), 1);
    assert_eq!(harness.admitted_count(event_id).await, 1);
}

#[tokio::test]
async fn transient_conflicts_are_retried() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let participant = harness.participant().await;
    harness.store.inject_conflicts(2);

    let registration = harness.engine.admit(event_id, participant, form()).await.unwrap();

    assert_eq!(registration.status, RegistrationStatus::Pending);
    assert_eq!(harness.admitted_count(event_id).await, 1);
    assert_eq!(harness.store.commit_count(), 1);
}

#[tokio::test]
async fn persistent_conflicts_surface_without_mutation() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let participant = harness.participant().await;
    harness.store.inject_conflicts(10);

    let result = harness.engine.admit(event_id, participant, form()).await;

    assert_eq!(result, Err(RegistrationError::Conflict));
    assert_eq!(harness.admitted_count(event_id).await, 0);
    assert_eq!(harness.store.commit_count(), 0);
    assert_eq!(harness.engine.list_registrations(event_id, None).await.unwrap().len(), 0);
}

#[tokio::test]
async fn shutdown_drains_pending_effects() {
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    let participant = harness.participant().await;
    harness.engine.admit(event_id, participant, form()).await.unwrap();

    assert!(harness.engine.shutdown(Duration::from_secs(1)).await);
    assert!(harness.notifier.wait_for(1, Duration::from_millis(100)).await);
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn listing_filters_by_status() {
    let harness = Harness::new();
    let event_id = harness.open_event(1).await;
    let (first, second) = (harness.participant().await, harness.participant().await);
    harness.engine.admit(event_id, first, form()).await.unwrap();
    harness.engine.admit(event_id, second, form()).await.unwrap();

    let waitlisted = harness
        .engine
        .list_registrations(event_id, Some(RegistrationStatus::Waitlisted))
        .await
        .unwrap();
    assert_eq!(waitlisted.len(), 1);
    assert_eq!(waitlisted[0].id.participant_id, second);
    assert_eq!(harness.engine.list_registrations(event_id, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn stats_summarize_the_event() {
    println!("🧪 Stats: capacity 2, three admissions, one paid");
    let harness = Harness::new();
    let event_id = harness.open_event(2).await;
    harness.clock.advance(chrono::Duration::days(8));
    let (p1, p2, p3) = (
        harness.participant().await,
        harness.participant().await,
        harness.participant().await,
    );
    for participant in [p1, p2, p3] {
        harness.engine.admit(event_id, participant, form()).await.unwrap();
    }
    let p1_id = RegistrationId::new(event_id, p1);
    harness.engine.transition(p1_id, RegistrationStatus::Approved, None).await.unwrap();
    harness.engine.update_payment_status(p1_id, PaymentStatus::Paid).await.unwrap();

    let stats = harness.engine.get_stats(event_id).await.unwrap();

    assert_eq!(stats.total, 3);
    assert_eq!(stats.admitted_count, 2);
    assert_eq!(stats.approved, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.waitlisted, 1);
    assert_eq!(stats.paid, 1);
    assert_eq!(stats.total_revenue, Money::from_units(STANDARD_FEE));
    // Pending and waitlisted fees are both still owed.
    assert_eq!(stats.pending_revenue, Money::from_units(2 * STANDARD_FEE));
    assert_eq!(stats.by_weight_class.get("93kg"), Some(&3));
    assert_eq!(stats.seats_remaining(), 0);
    println!("  ✓ Stats match the registrations");
}
