//! Registration reducer.
//!
//! Every engine operation is one pass through [`RegistrationReducer`]: the
//! engine loads the event and the registration into a [`LedgerState`], reduces
//! one command, and commits whatever the reducer touched as a single
//! [`LedgerCommit`]. The reducer itself never performs I/O. Notifications and
//! revenue refreshes come back as effects, which the engine only runs once the
//! commit has landed.
//!
//! **Concurrency Strategy**: the admitted count is only changed here, in the
//! same state that produces the registration write, and the event write carries
//! the version the count was read at. Two admissions racing for the last seat
//! both decide `Admit`, but only one commit passes the version guard; the loser
//! retries against the new count and is waitlisted.

use crate::error::{RegistrationError, Resource};
use crate::lifecycle::{PaymentStatus, RegistrationStatus, SeatEffect};
use crate::metrics::record_notification_failure;
use crate::notifier::Notifier;
use crate::profile::ParticipantProfile;
use crate::stats::refresh_cached_revenue;
use crate::store::{EventWrite, LedgerCommit, RegistrationStore, RegistrationWrite};
use crate::types::{
    Event, EventId, ParticipantId, Registration, RegistrationForm, RegistrationId, StatusChange,
    WeighIn,
};
use crate::validation::{AdmissionDecision, check_admission};
use chrono::{DateTime, Utc};
use meetreg_core::version::{Version, Versioned};
use meetreg_core::{
    SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec,
};
use std::sync::Arc;

const MAX_FLIGHT_LABEL: usize = 32;

// ============================================================================
// State
// ============================================================================

/// Records an operation reads and may write, plus what the reducer did to them.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerState {
    /// Event snapshot, including its admitted count
    pub event: Event,
    /// Version the event was read at
    pub event_version: Version,
    /// Registration for the participant, if one is on file
    pub registration: Option<Registration>,
    /// Version the registration was read at (`None` = not on file)
    pub registration_version: Option<Version>,
    /// Whether the commit must guard (and write) the event
    pub event_touched: bool,
    /// Whether the registration changed
    pub registration_touched: bool,
    /// Gate decision of the last admission
    pub decision: Option<AdmissionDecision>,
    /// Last rejection
    pub last_error: Option<RegistrationError>,
}

impl LedgerState {
    /// State for an event with no registration loaded.
    #[must_use]
    pub const fn for_event(event: Event, event_version: Version) -> Self {
        Self {
            event,
            event_version,
            registration: None,
            registration_version: None,
            event_touched: false,
            registration_touched: false,
            decision: None,
            last_error: None,
        }
    }

    /// State from freshly loaded records.
    #[must_use]
    pub fn load(event: Versioned<Event>, registration: Option<Versioned<Registration>>) -> Self {
        let state = Self::for_event(event.value, event.version);
        match registration {
            Some(registration) => state.with_registration(registration.value, registration.version),
            None => state,
        }
    }

    /// Attach the registration on file.
    #[must_use]
    pub fn with_registration(mut self, registration: Registration, version: Version) -> Self {
        self.registration = Some(registration);
        self.registration_version = Some(version);
        self
    }

    /// The writes this state needs, or `None` if nothing changed.
    ///
    /// The event write is included whenever the reducer read the ledger to
    /// decide, even if the count did not move, so that decision is
    /// invalidated by any concurrent seat move.
    #[must_use]
    pub fn pending_commit(&self) -> Option<LedgerCommit> {
        if !self.registration_touched {
            return None;
        }
        let registration = self.registration.clone()?;
        let event = self.event_touched.then(|| EventWrite {
            event_id: self.event.id,
            expected_version: self.event_version,
            admitted_count: self.event.admitted_count,
        });
        Some(LedgerCommit {
            event,
            registration: RegistrationWrite {
                expected_version: self.registration_version,
                registration,
            },
        })
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Commands the engine issues and the events they produce.
#[derive(Clone, Debug, PartialEq)]
pub enum RegistrationAction {
    // Commands
    /// Enter a participant into the event
    Admit {
        /// Participant entering
        participant_id: ParticipantId,
        /// Submitted form
        form: RegistrationForm,
        /// Participant's profile
        profile: ParticipantProfile,
    },

    /// Move a registration to another status (organizer)
    Transition {
        /// Registration to move
        registration_id: RegistrationId,
        /// Target status
        to: RegistrationStatus,
        /// Organizer notes
        notes: Option<String>,
    },

    /// Change the payment status (payment collaborator)
    UpdatePaymentStatus {
        /// Registration paid for
        registration_id: RegistrationId,
        /// New payment status
        to: PaymentStatus,
    },

    /// Record or correct a weigh-in (weigh-in operator)
    RecordWeighIn {
        /// Registration weighed
        registration_id: RegistrationId,
        /// Measured weight
        actual_weight_kg: f64,
        /// Whether the participant made weight
        passed: bool,
        /// Operator notes, mandatory for corrections
        notes: Option<String>,
    },

    /// Withdraw from the event (participant or organizer)
    Withdraw {
        /// Registration to withdraw
        registration_id: RegistrationId,
        /// Why
        reason: Option<String>,
    },

    /// Put an admitted registration into a flight and onto a platform
    AssignFlight {
        /// Registration to place
        registration_id: RegistrationId,
        /// Flight label
        flight: String,
        /// Platform number
        platform: Option<u16>,
    },

    // Events
    /// A registration was created or revived
    Admitted {
        /// The registration as it will be committed
        registration: Box<Registration>,
        /// Gate decision (`Admit` or `Waitlist`)
        decision: AdmissionDecision,
    },

    /// A live registration already existed; nothing to write
    AlreadyRegistered,

    /// Status changed
    StatusChanged {
        /// Previous status
        from: RegistrationStatus,
        /// New status
        to: RegistrationStatus,
        /// Effect on the admitted count
        seat: SeatEffect,
        /// Organizer notes
        notes: Option<String>,
        /// Reason recorded on withdrawal
        withdrawal_reason: Option<String>,
        /// When
        at: DateTime<Utc>,
    },

    /// Payment status changed
    PaymentStatusChanged {
        /// Previous payment status
        from: PaymentStatus,
        /// New payment status
        to: PaymentStatus,
        /// When
        at: DateTime<Utc>,
    },

    /// Weigh-in recorded
    WeighInRecorded {
        /// The result now on file
        weigh_in: WeighIn,
    },

    /// Flight and platform assigned
    FlightAssigned {
        /// Flight label
        flight: String,
        /// Platform number
        platform: Option<u16>,
        /// When
        at: DateTime<Utc>,
    },

    /// Command rejected
    ValidationFailed {
        /// Why
        error: RegistrationError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the registration reducer
#[derive(Clone)]
pub struct RegistrationEnvironment {
    /// Clock for deadlines and timestamps
    pub clock: Arc<dyn Clock>,
    /// Receiver of confirmations and status changes
    pub notifier: Arc<dyn Notifier>,
    /// Store, used by the post-commit revenue refresh
    pub store: Arc<dyn RegistrationStore>,
}

impl RegistrationEnvironment {
    /// Creates a new `RegistrationEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn RegistrationStore>,
    ) -> Self {
        Self {
            clock,
            notifier,
            store,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for registrations and the capacity ledger
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationReducer;

impl RegistrationReducer {
    /// Creates a new `RegistrationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn loaded<'a>(
        state: &'a LedgerState,
        registration_id: RegistrationId,
    ) -> Result<&'a Registration, RegistrationError> {
        state
            .registration
            .as_ref()
            .filter(|registration| registration.id == registration_id)
            .ok_or(RegistrationError::NotFound(Resource::Registration(registration_id)))
    }

    /// Run the gate and build the registration an admission would commit.
    fn decide_admission(
        state: &LedgerState,
        participant_id: ParticipantId,
        form: RegistrationForm,
        profile: &ParticipantProfile,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAction, RegistrationError> {
        if profile.participant_id != participant_id {
            return Err(RegistrationError::Validation(
                "profile belongs to a different participant".to_string(),
            ));
        }

        let decision = check_admission(&state.event, state.registration.as_ref(), &form, now)?;
        let status = match decision {
            AdmissionDecision::AlreadyRegistered => return Ok(RegistrationAction::AlreadyRegistered),
            AdmissionDecision::Admit => RegistrationStatus::Pending,
            AdmissionDecision::Waitlist => RegistrationStatus::Waitlisted,
        };

        let emergency_contact = form
            .emergency_contact
            .or_else(|| profile.emergency_contact.clone())
            .ok_or_else(|| {
                RegistrationError::Validation("an emergency contact is required".to_string())
            })?;
        let fee = state.event.fees.fee_at(now);

        let registration = match &state.registration {
            // Re-entry after rejection or withdrawal revives the keyed record.
            Some(previous) => {
                let mut revived = previous.clone();
                revived.history.push(StatusChange {
                    from: Some(previous.status),
                    to: status,
                    at: now,
                    notes: Some("re-admitted".to_string()),
                });
                revived.category = form.category;
                revived.emergency_contact = emergency_contact;
                revived.membership = form.membership;
                revived.coach = form.coach;
                revived.team = form.team;
                revived.expected_weight_kg = form.expected_weight_kg;
                revived.status = status;
                revived.payment_status = PaymentStatus::Unpaid;
                revived.fee = fee;
                revived.flight = None;
                revived.platform = None;
                revived.weigh_in = None;
                revived.notes = None;
                revived.withdrawal_reason = None;
                revived.updated_at = now;
                revived
            },
            None => Registration {
                id: RegistrationId::new(state.event.id, participant_id),
                category: form.category,
                personal: profile.personal_details(),
                emergency_contact,
                membership: form.membership,
                coach: form.coach,
                team: form.team,
                status,
                payment_status: PaymentStatus::Unpaid,
                fee,
                expected_weight_kg: form.expected_weight_kg,
                flight: None,
                platform: None,
                weigh_in: None,
                notes: None,
                withdrawal_reason: None,
                history: vec![StatusChange {
                    from: None,
                    to: status,
                    at: now,
                    notes: None,
                }],
                registered_at: now,
                updated_at: now,
            },
        };

        Ok(RegistrationAction::Admitted {
            registration: Box::new(registration),
            decision,
        })
    }

    fn decide_transition(
        state: &LedgerState,
        registration_id: RegistrationId,
        to: RegistrationStatus,
        notes: Option<String>,
        withdrawal_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAction, RegistrationError> {
        let registration = Self::loaded(state, registration_id)?;
        let seat = registration.status.transition(to)?;

        if seat == SeatEffect::Claim && !state.event.has_capacity() {
            return Err(RegistrationError::CapacityExhausted {
                capacity: state.event.capacity.value(),
            });
        }

        Ok(RegistrationAction::StatusChanged {
            from: registration.status,
            to,
            seat,
            notes,
            withdrawal_reason,
            at: now,
        })
    }

    fn decide_weigh_in(
        state: &LedgerState,
        registration_id: RegistrationId,
        actual_weight_kg: f64,
        passed: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAction, RegistrationError> {
        let registration = Self::loaded(state, registration_id)?;
        if !registration.status.is_admitted() {
            return Err(RegistrationError::WeighInNotAllowed(registration.status));
        }
        if !actual_weight_kg.is_finite() || actual_weight_kg <= 0.0 {
            return Err(RegistrationError::Validation(format!(
                "weight must be a positive number of kilograms, got {actual_weight_kg}"
            )));
        }

        let notes = notes.filter(|note| !note.trim().is_empty());
        let corrections = match &registration.weigh_in {
            None => 0,
            Some(_) if notes.is_none() => return Err(RegistrationError::WeighInAlreadyRecorded),
            Some(previous) => previous.corrections.saturating_add(1),
        };

        Ok(RegistrationAction::WeighInRecorded {
            weigh_in: WeighIn {
                actual_weight_kg,
                passed,
                recorded_at: now,
                corrections,
                notes,
            },
        })
    }

    fn decide_flight(
        state: &LedgerState,
        registration_id: RegistrationId,
        flight: &str,
        platform: Option<u16>,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAction, RegistrationError> {
        let registration = Self::loaded(state, registration_id)?;
        if !registration.status.is_admitted() {
            return Err(RegistrationError::FlightAssignmentNotAllowed(registration.status));
        }
        let flight = flight.trim();
        if flight.is_empty() || flight.len() > MAX_FLIGHT_LABEL {
            return Err(RegistrationError::Validation(format!(
                "flight label must be 1 to {MAX_FLIGHT_LABEL} characters"
            )));
        }
        Ok(RegistrationAction::FlightAssigned {
            flight: flight.to_string(),
            platform,
            at: now,
        })
    }

    /// Apply an event to state
    fn apply_event(state: &mut LedgerState, action: &RegistrationAction) {
        match action {
            RegistrationAction::Admitted {
                registration,
                decision,
            } => {
                if *decision == AdmissionDecision::Admit {
                    state.event.admitted_count = state.event.admitted_count.saturating_add(1);
                }
                state.registration = Some(registration.as_ref().clone());
                state.decision = Some(*decision);
                state.event_touched = true;
                state.registration_touched = true;
                state.last_error = None;
            },

            RegistrationAction::AlreadyRegistered => {
                state.decision = Some(AdmissionDecision::AlreadyRegistered);
                state.last_error = None;
            },

            RegistrationAction::StatusChanged {
                to,
                seat,
                notes,
                withdrawal_reason,
                at,
                ..
            } => {
                if let Some(registration) = state.registration.as_mut() {
                    registration.record_status(*to, *at, notes.clone());
                    if let Some(reason) = withdrawal_reason {
                        registration.record_withdrawal_reason(reason.clone());
                    }
                    state.registration_touched = true;
                }
                match seat {
                    SeatEffect::Claim => {
                        state.event.admitted_count = state.event.admitted_count.saturating_add(1);
                        state.event_touched = true;
                    },
                    SeatEffect::Release => {
                        state.event.admitted_count = state.event.admitted_count.saturating_sub(1);
                        state.event_touched = true;
                    },
                    SeatEffect::Unchanged => {},
                }
                state.last_error = None;
            },

            RegistrationAction::PaymentStatusChanged { to, at, .. } => {
                if let Some(registration) = state.registration.as_mut() {
                    registration.payment_status = *to;
                    registration.updated_at = *at;
                    state.registration_touched = true;
                }
                state.last_error = None;
            },

            RegistrationAction::WeighInRecorded { weigh_in } => {
                if let Some(registration) = state.registration.as_mut() {
                    registration.updated_at = weigh_in.recorded_at;
                    registration.weigh_in = Some(weigh_in.clone());
                    state.registration_touched = true;
                }
                state.last_error = None;
            },

            RegistrationAction::FlightAssigned {
                flight,
                platform,
                at,
            } => {
                if let Some(registration) = state.registration.as_mut() {
                    registration.flight = Some(flight.clone());
                    registration.platform = *platform;
                    registration.updated_at = *at;
                    state.registration_touched = true;
                }
                state.last_error = None;
            },

            RegistrationAction::ValidationFailed { error } => {
                state.last_error = Some(error.clone());
            },

            // Commands don't modify state directly
            RegistrationAction::Admit { .. }
            | RegistrationAction::Transition { .. }
            | RegistrationAction::UpdatePaymentStatus { .. }
            | RegistrationAction::RecordWeighIn { .. }
            | RegistrationAction::Withdraw { .. }
            | RegistrationAction::AssignFlight { .. } => {},
        }
    }

    fn confirmation_effect(
        env: &RegistrationEnvironment,
        registration: Registration,
        event: Event,
    ) -> Effect<RegistrationAction> {
        let notifier = Arc::clone(&env.notifier);
        Effect::fire_and_forget(async move {
            let registration_id = registration.id;
            if let Err(error) = notifier.registration_confirmed(registration, event).await {
                tracing::warn!(%registration_id, %error, "Confirmation notification failed");
                record_notification_failure("registration_confirmed");
            }
        })
    }

    fn status_change_effect(
        env: &RegistrationEnvironment,
        registration: Registration,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> Effect<RegistrationAction> {
        let notifier = Arc::clone(&env.notifier);
        Effect::fire_and_forget(async move {
            let registration_id = registration.id;
            if let Err(error) = notifier.status_changed(registration, from, to).await {
                tracing::warn!(%registration_id, %from, %to, %error, "Status notification failed");
                record_notification_failure("status_changed");
            }
        })
    }

    fn revenue_refresh_effect(
        env: &RegistrationEnvironment,
        event_id: EventId,
    ) -> Effect<RegistrationAction> {
        let store = Arc::clone(&env.store);
        Effect::fire_and_forget(async move {
            if let Err(error) = refresh_cached_revenue(store.as_ref(), event_id).await {
                tracing::warn!(%event_id, %error, "Cached revenue refresh failed");
            }
        })
    }

    fn reject(state: &mut LedgerState, error: RegistrationError) -> SmallVec<[Effect<RegistrationAction>; 4]> {
        Self::apply_event(state, &RegistrationAction::ValidationFailed { error });
        SmallVec::new()
    }

    fn change_status(
        state: &mut LedgerState,
        env: &RegistrationEnvironment,
        decided: Result<RegistrationAction, RegistrationError>,
    ) -> SmallVec<[Effect<RegistrationAction>; 4]> {
        let event = match decided {
            Ok(event) => event,
            Err(error) => return Self::reject(state, error),
        };
        Self::apply_event(state, &event);

        match (&event, &state.registration) {
            (RegistrationAction::StatusChanged { from, to, .. }, Some(registration)) => {
                smallvec![Self::status_change_effect(env, registration.clone(), *from, *to)]
            },
            _ => SmallVec::new(),
        }
    }
}

impl Reducer for RegistrationReducer {
    type State = LedgerState;
    type Action = RegistrationAction;
    type Environment = RegistrationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            RegistrationAction::Admit {
                participant_id,
                form,
                profile,
            } => {
                let now = env.clock.now();
                let event = match Self::decide_admission(state, participant_id, form, &profile, now) {
                    Ok(event) => event,
                    Err(error) => return Self::reject(state, error),
                };
                Self::apply_event(state, &event);

                match (&event, &state.registration) {
                    (RegistrationAction::Admitted { .. }, Some(registration)) => smallvec![
                        Self::confirmation_effect(env, registration.clone(), state.event.clone())
                    ],
                    _ => SmallVec::new(),
                }
            },

            RegistrationAction::Transition {
                registration_id,
                to,
                notes,
            } => {
                let now = env.clock.now();
                let decided = Self::decide_transition(state, registration_id, to, notes, None, now);
                Self::change_status(state, env, decided)
            },

            RegistrationAction::Withdraw {
                registration_id,
                reason,
            } => {
                let now = env.clock.now();
                let decided = Self::decide_transition(
                    state,
                    registration_id,
                    RegistrationStatus::Withdrawn,
                    None,
                    reason,
                    now,
                );
                Self::change_status(state, env, decided)
            },

            RegistrationAction::UpdatePaymentStatus {
                registration_id,
                to,
            } => {
                let decided = Self::loaded(state, registration_id).and_then(|registration| {
                    registration.payment_status.transition(to)?;
                    Ok(RegistrationAction::PaymentStatusChanged {
                        from: registration.payment_status,
                        to,
                        at: env.clock.now(),
                    })
                });
                let event = match decided {
                    Ok(event) => event,
                    Err(error) => return Self::reject(state, error),
                };
                Self::apply_event(state, &event);
                smallvec![Self::revenue_refresh_effect(env, state.event.id)]
            },

            RegistrationAction::RecordWeighIn {
                registration_id,
                actual_weight_kg,
                passed,
                notes,
            } => {
                let now = env.clock.now();
                match Self::decide_weigh_in(state, registration_id, actual_weight_kg, passed, notes, now) {
                    Ok(event) => Self::apply_event(state, &event),
                    Err(error) => return Self::reject(state, error),
                }
                SmallVec::new()
            },

            RegistrationAction::AssignFlight {
                registration_id,
                flight,
                platform,
            } => {
                let now = env.clock.now();
                match Self::decide_flight(state, registration_id, &flight, platform, now) {
                    Ok(event) => Self::apply_event(state, &event),
                    Err(error) => return Self::reject(state, error),
                }
                SmallVec::new()
            },

            // ========== Events ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
