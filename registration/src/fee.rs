//! Fee calculation.
//!
//! The amount due is fixed at admission time from the event's fee schedule and
//! the admission instant. Nothing here reads a clock.

use crate::types::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pricing for one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Regular entry fee
    pub standard: Money,
    /// Discounted fee, if the event offers one
    pub early_bird: Option<Money>,
    /// Last instant (inclusive) at which the discounted fee applies
    pub early_bird_deadline: Option<DateTime<Utc>>,
}

impl FeeSchedule {
    /// Schedule with a single flat fee.
    #[must_use]
    pub const fn flat(standard: Money) -> Self {
        Self {
            standard,
            early_bird: None,
            early_bird_deadline: None,
        }
    }

    /// Schedule with an early-bird discount ending at `deadline`.
    #[must_use]
    pub const fn with_early_bird(standard: Money, early_bird: Money, deadline: DateTime<Utc>) -> Self {
        Self {
            standard,
            early_bird: Some(early_bird),
            early_bird_deadline: Some(deadline),
        }
    }

    /// Fee owed by someone admitted at `now`.
    #[must_use]
    pub fn fee_at(&self, now: DateTime<Utc>) -> Money {
        calculate_fee(self.standard, self.early_bird, self.early_bird_deadline, now)
    }
}

/// Returns `early_bird` iff both it and its deadline are set and `now` is not
/// after the deadline; otherwise `standard`.
#[must_use]
pub fn calculate_fee(
    standard: Money,
    early_bird: Option<Money>,
    early_bird_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Money {
    match (early_bird, early_bird_deadline) {
        (Some(discounted), Some(deadline)) if now <= deadline => discounted,
        _ => standard,
    }
}
