//! Admission gate.
//!
//! Decides whether a participant may enter an event, given the event snapshot,
//! any registration already on file and the submitted form. The gate is pure:
//! it never writes, so a rejection can never leave partial state behind.

use crate::error::RegistrationError;
use crate::types::{Event, Registration, RegistrationForm};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Outcome of a successful pass through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// A seat is free: create a pending registration and claim it
    Admit,
    /// The event is full: create a waitlisted registration, no seat
    Waitlist,
    /// A live registration already exists and is returned unchanged
    AlreadyRegistered,
}

impl AdmissionDecision {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admit => "admit",
            Self::Waitlist => "waitlist",
            Self::AlreadyRegistered => "already_registered",
        }
    }
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural checks on the form (labels, lengths, plausible weight).
///
/// # Errors
///
/// Returns [`RegistrationError::Validation`] describing every failed field.
pub fn validate_form(form: &RegistrationForm) -> Result<(), RegistrationError> {
    form.validate().map_err(RegistrationError::from)
}

/// Run the admission checks in order, stopping at the first failure.
///
/// 1. The event lifecycle accepts entries.
/// 2. `now` is at or before the registration deadline.
/// 3. A live registration for the participant short-circuits to
///    [`AdmissionDecision::AlreadyRegistered`], whatever the form says.
/// 4. The form is structurally valid ([`validate_form`]).
/// 5. The chosen category labels are offered by the event.
/// 6. A supplied federation membership is still valid at `now`.
/// 7. The capacity ledger has room ([`Admit`](AdmissionDecision::Admit)) or not
///    ([`Waitlist`](AdmissionDecision::Waitlist)).
///
/// # Errors
///
/// - [`RegistrationError::EventNotOpen`] if the lifecycle does not accept entries
/// - [`RegistrationError::DeadlinePassed`] if `now` is after the deadline
/// - [`RegistrationError::Validation`] if the form is malformed or a category
///   label is not offered
/// - [`RegistrationError::MembershipExpired`] if the membership has lapsed
pub fn check_admission(
    event: &Event,
    existing: Option<&Registration>,
    form: &RegistrationForm,
    now: DateTime<Utc>,
) -> Result<AdmissionDecision, RegistrationError> {
    if !event.lifecycle.accepts_registrations() {
        return Err(RegistrationError::EventNotOpen(event.lifecycle));
    }

    if now > event.registration_deadline {
        return Err(RegistrationError::DeadlinePassed {
            deadline: event.registration_deadline,
        });
    }

    if existing.is_some_and(Registration::is_active) {
        return Ok(AdmissionDecision::AlreadyRegistered);
    }

    validate_form(form)?;

    if let Some(reason) = event.options.rejection(&form.category) {
        return Err(RegistrationError::Validation(reason));
    }

    if let Some(membership) = &form.membership {
        if membership.expires_at <= now {
            return Err(RegistrationError::MembershipExpired {
                expires_at: membership.expires_at,
            });
        }
    }

    if event.has_capacity() {
        Ok(AdmissionDecision::Admit)
    } else {
        Ok(AdmissionDecision::Waitlist)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fee::FeeSchedule;
    use crate::lifecycle::{PaymentStatus, RegistrationStatus};
    use crate::types::{
        Capacity, Category, CategoryOptions, EmergencyContact, EventId, EventLifecycle,
        FederationMembership, Gender, Money, ParticipantId, PersonalDetails, RegistrationId,
    };
    use chrono::{Duration, NaiveDate};
    use meetreg_testing::test_epoch;

    fn open_event(capacity: u32) -> Event {
        Event::new(
            EventId::new(),
            "Spring Open",
            Capacity::new(capacity),
            test_epoch() + Duration::days(30),
            FeeSchedule::flat(Money::from_units(85)),
        )
        .with_lifecycle(EventLifecycle::RegistrationOpen)
    }

    fn form() -> RegistrationForm {
        RegistrationForm::new(Category::new("83kg", "open", "raw"))
    }

    fn registration_in(event: &Event, status: RegistrationStatus) -> Registration {
        Registration {
            id: RegistrationId::new(event.id, ParticipantId::new()),
            category: Category::new("83kg", "open", "raw"),
            personal: PersonalDetails {
                date_of_birth: NaiveDate::from_ymd_opt(1995, 4, 12).unwrap(),
                gender: Gender::Female,
            },
            emergency_contact: EmergencyContact {
                name: "Sam Rivera".into(),
                phone: "+1 555 0100".into(),
                relationship: "sibling".into(),
            },
            membership: None,
            coach: None,
            team: None,
            status,
            payment_status: PaymentStatus::Unpaid,
            fee: Money::from_units(85),
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

    #[test]
    fn admits_when_seats_remain() {
        let event = open_event(2);
        assert_eq!(
            check_admission(&event, None, &form(), test_epoch()),
            Ok(AdmissionDecision::Admit)
        );
    }

    #[test]
    fn waitlists_when_full() {
        let mut event = open_event(1);
        event.admitted_count = 1;
        assert_eq!(
            check_admission(&event, None, &form(), test_epoch()),
            Ok(AdmissionDecision::Waitlist)
        );
    }

    #[test]
    fn closed_lifecycles_are_rejected() {
        for lifecycle in EventLifecycle::ALL {
            let event = open_event(5).with_lifecycle(lifecycle);
            let result = check_admission(&event, None, &form(), test_epoch());
            if lifecycle.accepts_registrations() {
                assert!(result.is_ok());
            } else {
                assert_eq!(result, Err(RegistrationError::EventNotOpen(lifecycle)));
            }
        }
    }

    #[test]
    fn deadline_is_inclusive() {
        let event = open_event(5);
        let deadline = event.registration_deadline;
        assert!(check_admission(&event, None, &form(), deadline).is_ok());
        assert_eq!(
            check_admission(&event, None, &form(), deadline + Duration::seconds(1)),
            Err(RegistrationError::DeadlinePassed { deadline })
        );
    }

    #[test]
    fn lifecycle_is_checked_before_deadline() {
        let event = open_event(5).with_lifecycle(EventLifecycle::Completed);
        let late = event.registration_deadline + Duration::days(1);
        assert_eq!(
            check_admission(&event, None, &form(), late),
            Err(RegistrationError::EventNotOpen(EventLifecycle::Completed))
        );
    }

    #[test]
    fn live_registration_short_circuits() {
        let mut event = open_event(1);
        event.admitted_count = 1;
        let existing = registration_in(&event, RegistrationStatus::Pending);
        // Even an expired membership does not matter once registered.
        let expired = form().with_membership(FederationMembership {
            federation: "USAPL".into(),
            membership_number: "A-1".into(),
            expires_at: test_epoch() - Duration::days(1),
        });
        assert_eq!(
            check_admission(&event, Some(&existing), &expired, test_epoch()),
            Ok(AdmissionDecision::AlreadyRegistered)
        );
    }

    #[test]
    fn malformed_form_is_checked_after_the_event_and_replay_checks() {
        let bad = RegistrationForm::new(Category::new("83kg", "", "raw")).with_expected_weight(900.0);

        let closed = open_event(5).with_lifecycle(EventLifecycle::Draft);
        assert_eq!(
            check_admission(&closed, None, &bad, test_epoch()),
            Err(RegistrationError::EventNotOpen(EventLifecycle::Draft))
        );

        let event = open_event(5);
        let existing = registration_in(&event, RegistrationStatus::Approved);
        assert_eq!(
            check_admission(&event, Some(&existing), &bad, test_epoch()),
            Ok(AdmissionDecision::AlreadyRegistered)
        );
        assert!(matches!(
            check_admission(&event, None, &bad, test_epoch()),
            Err(RegistrationError::Validation(_))
        ));
    }

    #[test]
    fn terminal_registration_goes_through_the_full_gate() {
        let event = open_event(3);
        let existing = registration_in(&event, RegistrationStatus::Withdrawn);
        assert_eq!(
            check_admission(&event, Some(&existing), &form(), test_epoch()),
            Ok(AdmissionDecision::Admit)
        );
    }

    #[test]
    fn membership_must_outlive_now() {
        let event = open_event(3);
        let expires_at = test_epoch();
        let form = form().with_membership(FederationMembership {
            federation: "USAPL".into(),
            membership_number: "A-1".into(),
            expires_at,
        });
        assert_eq!(
            check_admission(&event, None, &form, test_epoch()),
            Err(RegistrationError::MembershipExpired { expires_at })
        );
    }

    #[test]
    fn unoffered_category_is_rejected() {
        let event = open_event(3).with_options(CategoryOptions {
            weight_classes: vec!["74kg".into()],
            divisions: Vec::new(),
            equipment: Vec::new(),
        });
        let result = check_admission(&event, None, &form(), test_epoch());
        assert!(matches!(result, Err(RegistrationError::Validation(_))));
    }

    #[test]
    fn form_validation_reports_bad_fields() {
        let bad = RegistrationForm::new(Category::new("83kg", "", "raw")).with_expected_weight(900.0);
        let error = validate_form(&bad).unwrap_err();
        assert!(matches!(error, RegistrationError::Validation(_)));
        assert!(validate_form(&form()).is_ok());
    }
}
