//! Registration engine.
//!
//! The public surface of the crate. Each mutating operation is an attempt loop:
//!
//! ```text
//! load event + registration ──▶ reduce command ──▶ commit writes ──▶ spawn effects
//!          ▲                                            │
//!          └────────── conflict (bounded, jittered) ────┘
//! ```
//!
//! Rejections from the reducer return immediately and are never retried. Only
//! a lost commit race is retried, each time from fresh reads. Effects
//! (notifications, revenue refresh) are spawned only after the commit that
//! justified them has landed, and nothing waits on them.

use crate::aggregate::{LedgerState, RegistrationAction, RegistrationEnvironment, RegistrationReducer};
use crate::error::{RegistrationError, Resource};
use crate::lifecycle::{PaymentStatus, RegistrationStatus};
use crate::metrics as business_metrics;
use crate::notifier::Notifier;
use crate::profile::ProfileProvider;
use crate::stats::EventStats;
use crate::store::RegistrationStore;
use crate::types::{Event, EventId, ParticipantId, Registration, RegistrationForm, RegistrationId};
use crate::validation::AdmissionDecision;
use meetreg_core::environment::Clock;
use meetreg_core::reducer::Reducer;
use meetreg_core::version::Version;
use meetreg_runtime::EffectExecutor;
use meetreg_runtime::retry::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of an admission: the registration on file and how it got there.
#[derive(Clone, Debug, PartialEq)]
pub struct Admission {
    /// The registration as committed (or as found, if already registered)
    pub registration: Registration,
    /// Gate decision
    pub decision: AdmissionDecision,
}

/// Admission and capacity engine for meet registrations.
pub struct RegistrationEngine {
    store: Arc<dyn RegistrationStore>,
    profiles: Arc<dyn ProfileProvider>,
    reducer: RegistrationReducer,
    env: RegistrationEnvironment,
    executor: EffectExecutor,
    retry_policy: RetryPolicy,
}

impl RegistrationEngine {
    /// Creates an engine with the default retry policy.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        profiles: Arc<dyn ProfileProvider>,
    ) -> Self {
        Self {
            env: RegistrationEnvironment::new(clock, notifier, Arc::clone(&store)),
            store,
            profiles,
            reducer: RegistrationReducer::new(),
            executor: EffectExecutor::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replace the policy used to retry conflicting commits.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RegistrationStore> {
        &self.store
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Insert or update an event on behalf of the event-management side.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Store`] if the write fails.
    #[tracing::instrument(skip_all, fields(event_id = %event.id))]
    pub async fn save_event(&self, event: Event) -> Result<Version, RegistrationError> {
        let version = self.store.save_event(event).await?;
        tracing::debug!(%version, "Event saved");
        Ok(version)
    }

    /// Enter a participant into an event.
    ///
    /// Returns the new registration (pending, or waitlisted if the event is
    /// full), or the existing one if the participant already holds a live
    /// registration.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Validation`] for a malformed form or unoffered category
    /// - [`RegistrationError::NotFound`] if the event or the participant's profile is missing
    /// - [`RegistrationError::EventNotOpen`], [`RegistrationError::DeadlinePassed`],
    ///   [`RegistrationError::MembershipExpired`] from the gate
    /// - [`RegistrationError::Conflict`] if every retry lost a commit race
    pub async fn admit(
        &self,
        event_id: EventId,
        participant_id: ParticipantId,
        form: RegistrationForm,
    ) -> Result<Registration, RegistrationError> {
        self.admit_with_decision(event_id, participant_id, form)
            .await
            .map(|admission| admission.registration)
    }

    /// Like [`admit`](Self::admit), also reporting the gate decision.
    ///
    /// # Errors
    ///
    /// Same as [`admit`](Self::admit).
    #[tracing::instrument(skip_all, fields(%event_id, %participant_id))]
    pub async fn admit_with_decision(
        &self,
        event_id: EventId,
        participant_id: ParticipantId,
        form: RegistrationForm,
    ) -> Result<Admission, RegistrationError> {
        let result = async {
            let profile = self
                .profiles
                .profile(participant_id)
                .await?
                .ok_or(RegistrationError::NotFound(Resource::Profile(participant_id)))?;

            let registration_id = RegistrationId::new(event_id, participant_id);
            let command = RegistrationAction::Admit {
                participant_id,
                form,
                profile,
            };
            let state = self.execute("admit", registration_id, command).await?;
            let decision = state.decision.unwrap_or(AdmissionDecision::AlreadyRegistered);
            let registration = Self::into_registration(state, registration_id)?;
            Ok::<_, RegistrationError>(Admission {
                registration,
                decision,
            })
        }
        .await;

        match &result {
            Ok(admission) => {
                business_metrics::record_admission(admission.decision);
                tracing::info!(
                    decision = %admission.decision,
                    status = %admission.registration.status,
                    fee = %admission.registration.fee,
                    "Admission processed"
                );
            },
            Err(error) => {
                business_metrics::record_rejection(error.kind());
                tracing::info!(%error, "Admission refused");
            },
        }
        result
    }

    /// Move a registration to another status.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the registration does not exist
    /// - [`RegistrationError::InvalidTransition`] for a move outside the table
    /// - [`RegistrationError::CapacityExhausted`] when approving a waitlisted
    ///   registration into a full event
    /// - [`RegistrationError::Conflict`] if every retry lost a commit race
    #[tracing::instrument(skip_all, fields(registration = %registration_id, %to))]
    pub async fn transition(
        &self,
        registration_id: RegistrationId,
        to: RegistrationStatus,
        notes: Option<String>,
    ) -> Result<Registration, RegistrationError> {
        let command = RegistrationAction::Transition {
            registration_id,
            to,
            notes,
        };
        let state = self.execute("transition", registration_id, command).await?;
        Self::record_status_change(&state);
        Self::into_registration(state, registration_id)
    }

    /// Withdraw a participant from an event.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the registration does not exist
    /// - [`RegistrationError::InvalidTransition`] if it is already rejected or withdrawn
    /// - [`RegistrationError::Conflict`] if every retry lost a commit race
    #[tracing::instrument(skip_all, fields(%event_id, %participant_id))]
    pub async fn withdraw(
        &self,
        event_id: EventId,
        participant_id: ParticipantId,
        reason: Option<String>,
    ) -> Result<Registration, RegistrationError> {
        let registration_id = RegistrationId::new(event_id, participant_id);
        let command = RegistrationAction::Withdraw {
            registration_id,
            reason,
        };
        let state = self.execute("withdraw", registration_id, command).await?;
        Self::record_status_change(&state);
        Self::into_registration(state, registration_id)
    }

    /// Change a registration's payment status.
    ///
    /// The event's cached revenue is refreshed in the background afterwards.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the registration does not exist
    /// - [`RegistrationError::InvalidPaymentTransition`] for a move outside the table
    /// - [`RegistrationError::Conflict`] if every retry lost a commit race
    #[tracing::instrument(skip_all, fields(registration = %registration_id, %to))]
    pub async fn update_payment_status(
        &self,
        registration_id: RegistrationId,
        to: PaymentStatus,
    ) -> Result<Registration, RegistrationError> {
        let command = RegistrationAction::UpdatePaymentStatus {
            registration_id,
            to,
        };
        let state = self.execute("update_payment_status", registration_id, command).await?;
        business_metrics::record_payment_change(to);
        Self::into_registration(state, registration_id)
    }

    /// Record a weigh-in, or correct an earlier one (`notes` required).
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the registration does not exist
    /// - [`RegistrationError::WeighInNotAllowed`] unless approved or checked in
    /// - [`RegistrationError::WeighInAlreadyRecorded`] for a correction without notes
    /// - [`RegistrationError::Validation`] for a non-positive weight
    #[tracing::instrument(skip_all, fields(registration = %registration_id))]
    pub async fn record_weigh_in(
        &self,
        registration_id: RegistrationId,
        actual_weight_kg: f64,
        passed: bool,
        notes: Option<String>,
    ) -> Result<Registration, RegistrationError> {
        let command = RegistrationAction::RecordWeighIn {
            registration_id,
            actual_weight_kg,
            passed,
            notes,
        };
        let state = self.execute("record_weigh_in", registration_id, command).await?;
        let registration = Self::into_registration(state, registration_id)?;
        let correction = registration
            .weigh_in
            .as_ref()
            .is_some_and(|weigh_in| weigh_in.corrections > 0);
        business_metrics::record_weigh_in(correction);
        Ok(registration)
    }

    /// Place an admitted registration into a flight and onto a platform.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::NotFound`] if the registration does not exist
    /// - [`RegistrationError::FlightAssignmentNotAllowed`] unless approved or checked in
    /// - [`RegistrationError::Validation`] for an empty or overlong flight label
    #[tracing::instrument(skip_all, fields(registration = %registration_id))]
    pub async fn assign_flight(
        &self,
        registration_id: RegistrationId,
        flight: String,
        platform: Option<u16>,
    ) -> Result<Registration, RegistrationError> {
        let command = RegistrationAction::AssignFlight {
            registration_id,
            flight,
            platform,
        };
        let state = self.execute("assign_flight", registration_id, command).await?;
        Self::into_registration(state, registration_id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Load one registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotFound`] if it does not exist.
    pub async fn get_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        self.store
            .load_registration(registration_id)
            .await?
            .map(|versioned| versioned.into_inner())
            .ok_or(RegistrationError::NotFound(Resource::Registration(registration_id)))
    }

    /// Load one event, including its admitted count and cached revenue.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotFound`] if it does not exist.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, RegistrationError> {
        self.store
            .load_event(event_id)
            .await?
            .map(|versioned| versioned.into_inner())
            .ok_or(RegistrationError::NotFound(Resource::Event(event_id)))
    }

    /// Registrations of an event in registration order, optionally of one status only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Store`] if the listing fails.
    pub async fn list_registrations(
        &self,
        event_id: EventId,
        status: Option<RegistrationStatus>,
    ) -> Result<Vec<Registration>, RegistrationError> {
        let mut registrations = self.store.list_registrations(event_id).await?;
        if let Some(status) = status {
            registrations.retain(|registration| registration.status == status);
        }
        Ok(registrations)
    }

    /// Statistics snapshot for an event.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NotFound`] if the event does not exist.
    #[tracing::instrument(skip_all, fields(%event_id))]
    pub async fn get_stats(&self, event_id: EventId) -> Result<EventStats, RegistrationError> {
        let event = self.get_event(event_id).await?;
        let registrations = self.store.list_registrations(event_id).await?;
        Ok(EventStats::compute(&event, &registrations))
    }

    // ========================================================================
    // Background work
    // ========================================================================

    /// Wait until every spawned notification and revenue refresh has finished.
    pub async fn flush_effects(&self) {
        self.executor.wait_idle().await;
    }

    /// Wait for in-flight effects, giving up after `timeout`.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let pending = self.executor.pending();
        let drained = self.executor.wait_idle_timeout(timeout).await;
        if drained {
            tracing::info!(pending, "Registration engine drained");
        } else {
            tracing::warn!(pending = self.executor.pending(), "Shutdown timed out with effects in flight");
        }
        drained
    }

    // ========================================================================
    // Attempt loop
    // ========================================================================

    async fn execute(
        &self,
        operation: &'static str,
        registration_id: RegistrationId,
        command: RegistrationAction,
    ) -> Result<LedgerState, RegistrationError> {
        let started = Instant::now();
        let result = retry_with_predicate(
            self.retry_policy.clone(),
            || self.attempt(operation, registration_id, command.clone()),
            RegistrationError::is_retryable,
        )
        .await;
        business_metrics::record_operation_duration(operation, started.elapsed());
        result
    }

    async fn attempt(
        &self,
        operation: &'static str,
        registration_id: RegistrationId,
        command: RegistrationAction,
    ) -> Result<LedgerState, RegistrationError> {
        let event_id = registration_id.event_id;
        let event = self
            .store
            .load_event(event_id)
            .await?
            .ok_or(RegistrationError::NotFound(Resource::Event(event_id)))?;
        let registration = self.store.load_registration(registration_id).await?;

        let mut state = LedgerState::load(event, registration);
        let effects = self.reducer.reduce(&mut state, command, &self.env);

        if let Some(error) = state.last_error.take() {
            return Err(error);
        }

        let Some(commit) = state.pending_commit() else {
            tracing::debug!(operation, "Nothing to commit");
            return Ok(state);
        };
        let seats_moved = commit.event.is_some();

        match self.store.commit(commit).await {
            Ok(outcome) => {
                tracing::debug!(
                    operation,
                    registration_version = %outcome.registration_version,
                    admitted_count = state.event.admitted_count,
                    "Commit applied"
                );
            },
            Err(error) => {
                let error = RegistrationError::from(error);
                if error.is_retryable() {
                    business_metrics::record_conflict(operation);
                }
                return Err(error);
            },
        }

        if seats_moved {
            business_metrics::update_seats_remaining(event_id, state.event.seats_remaining());
        }

        // Effects only run for committed state; nobody waits on them.
        let _handle = self.executor.execute(effects);
        Ok(state)
    }

    fn into_registration(
        state: LedgerState,
        registration_id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        state
            .registration
            .ok_or(RegistrationError::NotFound(Resource::Registration(registration_id)))
    }

    fn record_status_change(state: &LedgerState) {
        let change = state
            .registration
            .as_ref()
            .and_then(|registration| registration.history.last());
        if let Some(change) = change {
            if let Some(from) = change.from {
                business_metrics::record_transition(from, change.to);
                tracing::info!(%from, to = %change.to, "Status changed");
            }
        }
    }
}

impl std::fmt::Debug for RegistrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationEngine")
            .field("executor", &self.executor)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
