//! Registration status and payment status state machines.
//!
//! Both are closed enums with exhaustive transition tables. The status machine
//! also reports how each legal move affects the event's admitted count, so the
//! capacity ledger is only ever adjusted from this table.

use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Registration status
// ============================================================================

/// Where a registration stands in the organizer's review process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Admitted, awaiting organizer review. Holds a seat.
    Pending,
    /// Accepted by the organizer. Holds a seat.
    Approved,
    /// Event was full at admission. Does not hold a seat.
    Waitlisted,
    /// Refused by the organizer. Terminal.
    Rejected,
    /// Withdrawn by the participant or organizer. Terminal.
    Withdrawn,
    /// Present at the venue. Holds a seat.
    CheckedIn,
}

/// How a status transition moves the event's admitted count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeatEffect {
    /// Count unchanged
    Unchanged,
    /// Count + 1, only if a seat is free
    Claim,
    /// Count - 1
    Release,
}

impl RegistrationStatus {
    /// All statuses, in display order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Approved,
        Self::Waitlisted,
        Self::Rejected,
        Self::Withdrawn,
        Self::CheckedIn,
    ];

    /// Whether a registration in this status counts toward capacity.
    #[must_use]
    pub const fn holds_seat(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::CheckedIn)
    }

    /// Whether no further status change is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Withdrawn)
    }

    /// Whether weigh-ins and flight assignments are allowed.
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Approved | Self::CheckedIn)
    }

    /// Seat effect of moving from `self` to `to`, or `None` if the move is illegal.
    #[must_use]
    pub const fn seat_effect(self, to: Self) -> Option<SeatEffect> {
        use RegistrationStatus::{Approved, CheckedIn, Pending, Rejected, Waitlisted, Withdrawn};

        match (self, to) {
            (Pending, Approved) | (Approved, CheckedIn) | (Waitlisted, Rejected | Withdrawn) => {
                Some(SeatEffect::Unchanged)
            },
            (Pending, Rejected | Withdrawn) | (Approved | CheckedIn, Withdrawn) => {
                Some(SeatEffect::Release)
            },
            (Waitlisted, Approved) => Some(SeatEffect::Claim),
            _ => None,
        }
    }

    /// Validate a transition and return its seat effect.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidTransition`] for any move outside the table,
    /// including "transitions" to the current status.
    pub fn transition(self, to: Self) -> Result<SeatEffect, RegistrationError> {
        self.seat_effect(to)
            .ok_or(RegistrationError::InvalidTransition { from: self, to })
    }

    /// Stable lowercase name used for storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Waitlisted => "waitlisted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::CheckedIn => "checked_in",
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistrationStatus {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RegistrationError::Validation(format!("unknown registration status: {s}")))
    }
}

// ============================================================================
// Payment status
// ============================================================================

/// Settlement state of the fee, independent of the registration status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing received yet
    Unpaid,
    /// Fee received in full
    Paid,
    /// Part of the fee received
    Partial,
    /// Fee forgiven by the organizer
    Waived,
    /// Fee returned to the participant
    Refunded,
}

impl PaymentStatus {
    /// All payment statuses, in display order.
    pub const ALL: [Self; 5] = [
        Self::Unpaid,
        Self::Paid,
        Self::Partial,
        Self::Waived,
        Self::Refunded,
    ];

    /// Whether `self -> to` is a legal payment transition.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Unpaid, Self::Paid | Self::Partial | Self::Waived)
                | (Self::Partial, Self::Paid | Self::Refunded)
                | (Self::Paid, Self::Refunded)
        )
    }

    /// Validate a payment transition.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidPaymentTransition`] for any move outside the table.
    pub fn transition(self, to: Self) -> Result<(), RegistrationError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(RegistrationError::InvalidPaymentTransition { from: self, to })
        }
    }

    /// Whether the fee is still owed.
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Unpaid | Self::Partial)
    }

    /// Stable lowercase name used for storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Waived => "waived",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = RegistrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RegistrationError::Validation(format!("unknown payment status: {s}")))
    }
}
