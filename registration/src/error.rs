//! Error types for registration operations.

use crate::lifecycle::{PaymentStatus, RegistrationStatus};
use crate::profile::ProfileError;
use crate::store::StoreError;
use crate::types::{EventId, EventLifecycle, ParticipantId, RegistrationId};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Record a lookup failed to find.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// Event record
    Event(EventId),
    /// Registration record
    Registration(RegistrationId),
    /// Participant profile
    Profile(ParticipantId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event {id}"),
            Self::Registration(id) => write!(f, "registration {id}"),
            Self::Profile(id) => write!(f, "profile of participant {id}"),
        }
    }
}

/// Errors returned by the registration engine.
///
/// Everything except [`Conflict`](Self::Conflict) is a decision about the
/// request itself and will fail again if retried unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Event, registration or profile does not exist
    #[error("{0} not found")]
    NotFound(Resource),

    /// Event lifecycle does not accept entries
    #[error("event is not open for registration (lifecycle: {0})")]
    EventNotOpen(EventLifecycle),

    /// Admission attempted after the registration deadline
    #[error("registration deadline {deadline} has passed")]
    DeadlinePassed {
        /// The event's deadline
        deadline: DateTime<Utc>,
    },

    /// Supplied federation membership is not current
    #[error("federation membership expired at {expires_at}")]
    MembershipExpired {
        /// When the membership lapsed
        expires_at: DateTime<Utc>,
    },

    /// Concurrent writers kept winning; the request may be retried
    #[error("concurrent update conflict, please retry")]
    Conflict,

    /// Status move outside the transition table
    #[error("cannot move registration from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: RegistrationStatus,
        /// Requested status
        to: RegistrationStatus,
    },

    /// Payment status move outside the transition table
    #[error("cannot move payment status from {from} to {to}")]
    InvalidPaymentTransition {
        /// Current payment status
        from: PaymentStatus,
        /// Requested payment status
        to: PaymentStatus,
    },

    /// Waitlisted registration cannot be approved because the event is full
    #[error("event is full ({capacity} seats taken)")]
    CapacityExhausted {
        /// Event capacity
        capacity: u32,
    },

    /// Weigh-in attempted for a registration that is not approved or checked in
    #[error("weigh-in requires an approved or checked-in registration (status: {0})")]
    WeighInNotAllowed(RegistrationStatus),

    /// Second weigh-in without a correction note
    #[error("weigh-in already recorded; a correction must include a note")]
    WeighInAlreadyRecorded,

    /// Flight assignment attempted for a registration that is not approved or checked in
    #[error("flight assignment requires an approved or checked-in registration (status: {0})")]
    FlightAssignmentNotAllowed(RegistrationStatus),

    /// Malformed input
    #[error("invalid registration data: {0}")]
    Validation(String),

    /// Persistence failure that is not a conflict
    #[error("store error: {0}")]
    Store(String),
}

impl RegistrationError {
    /// Whether retrying the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::EventNotOpen(_) => "event_not_open",
            Self::DeadlinePassed { .. } => "deadline_passed",
            Self::MembershipExpired { .. } => "membership_expired",
            Self::Conflict => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidPaymentTransition { .. } => "invalid_payment_transition",
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::WeighInNotAllowed(_) => "weigh_in_not_allowed",
            Self::WeighInAlreadyRecorded => "weigh_in_already_recorded",
            Self::FlightAssignmentNotAllowed(_) => "flight_assignment_not_allowed",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store",
        }
    }
}

impl From<StoreError> for RegistrationError {
    fn from(error: StoreError) -> Self {
        match error {
            // A failed capacity constraint means the count we read was stale.
            StoreError::ConcurrencyConflict { .. } | StoreError::CapacityExceeded { .. } => {
                Self::Conflict
            },
            StoreError::NotFound(resource) => Self::NotFound(resource),
            StoreError::Database(message) | StoreError::Serialization(message) => {
                Self::Store(message)
            },
        }
    }
}

impl From<ProfileError> for RegistrationError {
    fn from(error: ProfileError) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<validator::ValidationErrors> for RegistrationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
