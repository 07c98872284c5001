//! Read-only statistics over an event's registrations.
//!
//! Snapshots are computed from a plain listing and may trail concurrent
//! admissions; they never take part in a commit.

use crate::lifecycle::{PaymentStatus, RegistrationStatus};
use crate::store::{RegistrationStore, StoreError};
use crate::types::{Event, EventId, Money, Registration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration statistics for one event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    /// Event the snapshot describes
    pub event_id: EventId,
    /// Event capacity
    pub capacity: u32,
    /// Seat-holding registrations according to the ledger
    pub admitted_count: u32,
    /// All registrations, any status
    pub total: u32,
    /// Pending registrations
    pub pending: u32,
    /// Approved registrations
    pub approved: u32,
    /// Checked-in registrations
    pub checked_in: u32,
    /// Waitlisted registrations
    pub waitlisted: u32,
    /// Rejected registrations
    pub rejected: u32,
    /// Withdrawn registrations
    pub withdrawn: u32,
    /// Registrations whose payment status is paid
    pub paid: u32,
    /// Sum of fees of paid registrations
    pub total_revenue: Money,
    /// Sum of fees still owed by active registrations (unpaid or partial)
    pub pending_revenue: Money,
    /// Mean declared weight of active registrations that declared one
    pub average_expected_weight_kg: Option<f64>,
    /// Active registrations per division
    pub by_division: BTreeMap<String, u32>,
    /// Active registrations per weight class
    pub by_weight_class: BTreeMap<String, u32>,
}

impl EventStats {
    /// Aggregate `registrations` against the `event` snapshot.
    #[must_use]
    pub fn compute(event: &Event, registrations: &[Registration]) -> Self {
        let mut stats = Self {
            event_id: event.id,
            capacity: event.capacity.value(),
            admitted_count: event.admitted_count,
            ..Self::default()
        };

        let mut weight_sum = 0.0_f64;
        let mut weight_count = 0_u32;

        for registration in registrations {
            stats.total += 1;
            match registration.status {
                RegistrationStatus::Pending => stats.pending += 1,
                RegistrationStatus::Approved => stats.approved += 1,
                RegistrationStatus::CheckedIn => stats.checked_in += 1,
                RegistrationStatus::Waitlisted => stats.waitlisted += 1,
                RegistrationStatus::Rejected => stats.rejected += 1,
                RegistrationStatus::Withdrawn => stats.withdrawn += 1,
            }

            if registration.payment_status == PaymentStatus::Paid {
                stats.paid += 1;
                stats.total_revenue = stats.total_revenue.saturating_add(registration.fee);
            }

            if !registration.is_active() {
                continue;
            }

            if registration.payment_status.is_outstanding() {
                stats.pending_revenue = stats.pending_revenue.saturating_add(registration.fee);
            }
            if let Some(kg) = registration.expected_weight_kg {
                weight_sum += kg;
                weight_count += 1;
            }
            *stats
                .by_division
                .entry(registration.category.division.clone())
                .or_default() += 1;
            *stats
                .by_weight_class
                .entry(registration.category.weight_class.clone())
                .or_default() += 1;
        }

        if weight_count > 0 {
            stats.average_expected_weight_kg = Some(weight_sum / f64::from(weight_count));
        }
        stats
    }

    /// Seats still free according to the ledger.
    #[must_use]
    pub const fn seats_remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.admitted_count)
    }
}

/// Sum of fees of registrations currently paid.
#[must_use]
pub fn paid_revenue<'a>(registrations: impl IntoIterator<Item = &'a Registration>) -> Money {
    registrations
        .into_iter()
        .filter(|registration| registration.payment_status == PaymentStatus::Paid)
        .map(|registration| registration.fee)
        .sum()
}

/// Recompute an event's paid revenue from scratch and cache it on the event.
///
/// # Errors
///
/// Returns the store error if the refresh fails.
pub async fn refresh_cached_revenue(
    store: &dyn RegistrationStore,
    event_id: EventId,
) -> Result<Money, StoreError> {
    let revenue = store.refresh_cached_revenue(event_id).await?;
    tracing::debug!(%event_id, revenue = %revenue, "Cached revenue refreshed");
    Ok(revenue)
}
