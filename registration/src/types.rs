//! Domain types for meet registration.
//!
//! Identifiers, money, the event record (including its capacity ledger) and the
//! registration record, plus the form a participant submits to enter.

use crate::fee::FeeSchedule;
use crate::lifecycle::{PaymentStatus, RegistrationStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event (meet)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a participant (athlete)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Creates a new random `ParticipantId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ParticipantId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration identity: one registration per (event, participant).
///
/// The key is derived, never generated, so concurrent admissions for the same
/// pair collide on the same record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationId {
    /// Event entered
    pub event_id: EventId,
    /// Participant entering
    pub participant_id: ParticipantId,
}

impl RegistrationId {
    /// Key for `participant_id`'s registration in `event_id`.
    #[must_use]
    pub const fn new(event_id: EventId, participant_id: ParticipantId) -> Self {
        Self {
            event_id,
            participant_id,
        }
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.participant_id)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole currency units, saturating on overflow
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, saturating at the maximum representable value
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Maximum number of seat-holding registrations for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    /// Creates a new `Capacity`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Event lifecycle, owned by the event-management side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLifecycle {
    /// Being prepared, invisible to participants
    Draft,
    /// Visible; entries accepted
    Published,
    /// Explicitly open for entries
    RegistrationOpen,
    /// No longer accepting entries
    RegistrationClosed,
    /// Competition underway
    InProgress,
    /// Competition finished
    Completed,
}

impl EventLifecycle {
    /// All lifecycle values.
    pub const ALL: [Self; 6] = [
        Self::Draft,
        Self::Published,
        Self::RegistrationOpen,
        Self::RegistrationClosed,
        Self::InProgress,
        Self::Completed,
    ];

    /// Whether new registrations may be admitted in this lifecycle state.
    #[must_use]
    pub const fn accepts_registrations(self) -> bool {
        matches!(self, Self::Published | Self::RegistrationOpen)
    }

    /// Stable lowercase name used for storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::RegistrationOpen => "registration_open",
            Self::RegistrationClosed => "registration_closed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Parse a stored lifecycle name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lifecycle| lifecycle.as_str() == s)
    }
}

impl fmt::Display for EventLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels an event offers for each competition category axis.
///
/// An empty list accepts any label for that axis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOptions {
    /// Weight classes, e.g. `"83kg"`
    pub weight_classes: Vec<String>,
    /// Divisions, e.g. `"open"`, `"junior"`
    pub divisions: Vec<String>,
    /// Equipment categories, e.g. `"raw"`, `"equipped"`
    pub equipment: Vec<String>,
}

impl CategoryOptions {
    /// First axis on which `category` picks a label the event does not offer.
    #[must_use]
    pub fn rejection(&self, category: &Category) -> Option<String> {
        let axes = [
            ("weight class", &self.weight_classes, &category.weight_class),
            ("division", &self.divisions, &category.division),
            ("equipment", &self.equipment, &category.equipment),
        ];
        axes.into_iter()
            .find(|(_, offered, chosen)| !offered.is_empty() && !offered.contains(*chosen))
            .map(|(axis, _, chosen)| format!("{axis} '{chosen}' is not offered by this event"))
    }
}

/// A capacity-limited, time-boxed competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identity
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Maximum seat-holding registrations
    pub capacity: Capacity,
    /// Seat-holding registrations right now (the capacity ledger)
    pub admitted_count: u32,
    /// Last instant (inclusive) at which entries are accepted
    pub registration_deadline: DateTime<Utc>,
    /// Pricing
    pub fees: FeeSchedule,
    /// Lifecycle state
    pub lifecycle: EventLifecycle,
    /// Category labels offered
    pub options: CategoryOptions,
    /// Sum of fees of paid registrations, refreshed after payment changes
    pub cached_revenue: Money,
}

impl Event {
    /// New draft event with no admissions.
    #[must_use]
    pub fn new(
        id: EventId,
        name: impl Into<String>,
        capacity: Capacity,
        registration_deadline: DateTime<Utc>,
        fees: FeeSchedule,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            capacity,
            admitted_count: 0,
            registration_deadline,
            fees,
            lifecycle: EventLifecycle::Draft,
            options: CategoryOptions::default(),
            cached_revenue: Money::ZERO,
        }
    }

    /// Set the lifecycle state.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: EventLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set the offered category labels.
    #[must_use]
    pub fn with_options(mut self, options: CategoryOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether at least one seat is free.
    #[must_use]
    pub const fn has_capacity(&self) -> bool {
        self.admitted_count < self.capacity.value()
    }

    /// Free seats.
    #[must_use]
    pub const fn seats_remaining(&self) -> u32 {
        self.capacity.value().saturating_sub(self.admitted_count)
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Competition category chosen at entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Category {
    /// Weight class label
    #[validate(length(min = 1, max = 32))]
    pub weight_class: String,
    /// Division label
    #[validate(length(min = 1, max = 32))]
    pub division: String,
    /// Equipment label
    #[validate(length(min = 1, max = 32))]
    pub equipment: String,
}

impl Category {
    /// Build a category from its three labels.
    #[must_use]
    pub fn new(
        weight_class: impl Into<String>,
        division: impl Into<String>,
        equipment: impl Into<String>,
    ) -> Self {
        Self {
            weight_class: weight_class.into(),
            division: division.into(),
            equipment: equipment.into(),
        }
    }
}

/// Gender as recorded on the participant's profile
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    /// Female
    Female,
    /// Male
    Male,
    /// Non-binary or not disclosed
    Other,
}

/// Personal details copied from the profile; immutable once set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalDetails {
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Gender
    pub gender: Gender,
}

/// Who to call if something goes wrong on the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EmergencyContact {
    /// Contact name
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Contact phone number
    #[validate(length(min = 5, max = 32))]
    pub phone: String,
    /// Relationship to the participant
    #[validate(length(min = 1, max = 50))]
    pub relationship: String,
}

/// Sanctioning-body membership; must be current at admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FederationMembership {
    /// Federation name
    #[validate(length(min = 1, max = 100))]
    pub federation: String,
    /// Membership number
    #[validate(length(min = 1, max = 64))]
    pub membership_number: String,
    /// Membership is valid strictly before this instant
    pub expires_at: DateTime<Utc>,
}

/// Recorded weigh-in result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeighIn {
    /// Measured body weight
    pub actual_weight_kg: f64,
    /// Whether the participant made weight
    pub passed: bool,
    /// When the (latest) result was recorded
    pub recorded_at: DateTime<Utc>,
    /// Number of corrections after the first recording
    pub corrections: u32,
    /// Operator note (mandatory for corrections)
    pub notes: Option<String>,
}

/// One entry in a registration's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Previous status; `None` when the record was created
    pub from: Option<RegistrationStatus>,
    /// New status
    pub to: RegistrationStatus,
    /// When the change was committed
    pub at: DateTime<Utc>,
    /// Free-form note from the actor
    pub notes: Option<String>,
}

/// A participant's enrollment in one event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Composite identity
    pub id: RegistrationId,
    /// Competition category
    pub category: Category,
    /// Profile-sourced personal details
    pub personal: PersonalDetails,
    /// Emergency contact
    pub emergency_contact: EmergencyContact,
    /// Federation membership, if supplied
    pub membership: Option<FederationMembership>,
    /// Coach name
    pub coach: Option<String>,
    /// Team or club
    pub team: Option<String>,
    /// Review status
    pub status: RegistrationStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Amount due, fixed at admission
    pub fee: Money,
    /// Declared body weight
    pub expected_weight_kg: Option<f64>,
    /// Flight (lifting group) assigned by the organizer
    pub flight: Option<String>,
    /// Platform assigned by the organizer
    pub platform: Option<u16>,
    /// Weigh-in result
    pub weigh_in: Option<WeighIn>,
    /// Organizer notes from the latest transition
    pub notes: Option<String>,
    /// Reason given when withdrawing
    pub withdrawal_reason: Option<String>,
    /// Audit trail of status changes, oldest first
    pub history: Vec<StatusChange>,
    /// First admission instant
    pub registered_at: DateTime<Utc>,
    /// Last mutation instant
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Whether this registration counts toward the event's capacity.
    #[must_use]
    pub const fn holds_seat(&self) -> bool {
        self.status.holds_seat()
    }

    /// Whether the registration is still live (not rejected or withdrawn).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Change status and append to the audit trail.
    pub fn record_status(
        &mut self,
        to: RegistrationStatus,
        at: DateTime<Utc>,
        notes: Option<String>,
    ) {
        self.history.push(StatusChange {
            from: Some(self.status),
            to,
            at,
            notes: notes.clone(),
        });
        self.status = to;
        if notes.is_some() {
            self.notes = notes;
        }
        self.updated_at = at;
    }

    /// Store the participant's withdrawal reason.
    ///
    /// The reason goes to `withdrawal_reason` and to the latest history entry;
    /// organizer `notes` are left alone.
    pub fn record_withdrawal_reason(&mut self, reason: String) {
        if let Some(change) = self.history.last_mut() {
            change.notes.get_or_insert_with(|| reason.clone());
        }
        self.withdrawal_reason = Some(reason);
    }
}

// ============================================================================
// Entry form
// ============================================================================

/// What a participant submits to enter an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct RegistrationForm {
    /// Chosen category
    #[validate(nested)]
    pub category: Category,
    /// Emergency contact; falls back to the profile's default when absent
    #[validate(nested)]
    pub emergency_contact: Option<EmergencyContact>,
    /// Federation membership
    #[validate(nested)]
    pub membership: Option<FederationMembership>,
    /// Coach name
    #[validate(length(min = 1, max = 100))]
    pub coach: Option<String>,
    /// Team or club
    #[validate(length(min = 1, max = 100))]
    pub team: Option<String>,
    /// Declared body weight
    #[validate(range(min = 20.0, max = 400.0))]
    pub expected_weight_kg: Option<f64>,
}

impl RegistrationForm {
    /// Minimal form for `category`; everything else is taken from the profile or left empty.
    #[must_use]
    pub const fn new(category: Category) -> Self {
        Self {
            category,
            emergency_contact: None,
            membership: None,
            coach: None,
            team: None,
            expected_weight_kg: None,
        }
    }

    /// Set the emergency contact.
    #[must_use]
    pub fn with_emergency_contact(mut self, contact: EmergencyContact) -> Self {
        self.emergency_contact = Some(contact);
        self
    }

    /// Set the federation membership.
    #[must_use]
    pub fn with_membership(mut self, membership: FederationMembership) -> Self {
        self.membership = Some(membership);
        self
    }

    /// Set the declared body weight.
    #[must_use]
    pub const fn with_expected_weight(mut self, kg: f64) -> Self {
        self.expected_weight_kg = Some(kg);
        self
    }

    /// Set coach and team.
    #[must_use]
    pub fn with_coach_and_team(mut self, coach: Option<String>, team: Option<String>) -> Self {
        self.coach = coach;
        self.team = team;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetreg_testing::test_epoch;

    #[test]
    fn money_display_and_sum() {
        assert_eq!(Money::from_cents(8_550).to_string(), "85.50");
        let total: Money = [Money::from_units(75), Money::from_units(85)].into_iter().sum();
        assert_eq!(total, Money::from_units(160));
        assert_eq!(Money::from_units(u64::MAX), Money::from_cents(u64::MAX));
    }

    #[test]
    fn lifecycle_gate() {
        assert!(EventLifecycle::Published.accepts_registrations());
        assert!(EventLifecycle::RegistrationOpen.accepts_registrations());
        assert!(!EventLifecycle::Draft.accepts_registrations());
        assert!(!EventLifecycle::RegistrationClosed.accepts_registrations());
        assert_eq!(EventLifecycle::parse("in_progress"), Some(EventLifecycle::InProgress));
        assert_eq!(EventLifecycle::parse("open"), None);
    }

    #[test]
    fn event_capacity_helpers() {
        let mut event = Event::new(
            EventId::new(),
            "Spring Open",
            Capacity::new(2),
            test_epoch(),
            FeeSchedule::flat(Money::from_units(50)),
        );
        assert!(event.has_capacity());
        event.admitted_count = 2;
        assert!(!event.has_capacity());
        assert_eq!(event.seats_remaining(), 0);
    }

    #[test]
    fn category_options_reject_unknown_labels() {
        let options = CategoryOptions {
            weight_classes: vec!["83kg".into(), "93kg".into()],
            divisions: vec![],
            equipment: vec!["raw".into()],
        };
        assert_eq!(options.rejection(&Category::new("83kg", "masters", "raw")), None);
        assert_eq!(
            options.rejection(&Category::new("120kg", "open", "raw")),
            Some("weight class '120kg' is not offered by this event".to_string())
        );
        assert!(options.rejection(&Category::new("93kg", "open", "equipped")).is_some());
    }

    #[test]
    fn form_validation_catches_bad_input() {
        let form = RegistrationForm::new(Category::new("", "open", "raw")).with_expected_weight(5.0);
        let errors = form.validate();
        assert!(errors.is_err());

        let good = RegistrationForm::new(Category::new("83kg", "open", "raw")).with_expected_weight(82.5);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn registration_id_display() {
        let id = RegistrationId::new(EventId::new(), ParticipantId::new());
        assert_eq!(id.to_string(), format!("{}/{}", id.event_id, id.participant_id));
    }
}
