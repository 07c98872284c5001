//! Participant profile provider.
//!
//! Admission copies date of birth and gender from the participant's profile and
//! falls back to the profile's emergency contact when the form has none.

use crate::types::{EmergencyContact, Gender, ParticipantId, PersonalDetails};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Profile provider error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// The provider could not be reached
    #[error("Profile provider unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`ProfileProvider`] methods.
pub type ProfileFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProfileError>> + Send + 'a>>;

/// What the identity side knows about a participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    /// Participant the profile belongs to
    pub participant_id: ParticipantId,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Gender
    pub gender: Gender,
    /// Default emergency contact
    pub emergency_contact: Option<EmergencyContact>,
}

impl ParticipantProfile {
    /// Personal details to copy onto a registration.
    #[must_use]
    pub const fn personal_details(&self) -> PersonalDetails {
        PersonalDetails {
            date_of_birth: self.date_of_birth,
            gender: self.gender,
        }
    }
}

/// Source of participant profiles.
///
/// Note: Returns a boxed future instead of async fn to be dyn-compatible.
pub trait ProfileProvider: Send + Sync {
    /// Look up a participant's profile; `None` if they have none.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Unavailable`] if the provider cannot answer.
    fn profile(&self, participant_id: ParticipantId) -> ProfileFuture<'_, Option<ParticipantProfile>>;
}

/// Profiles held in memory, for tests and the demo.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProfileProvider {
    profiles: Arc<RwLock<HashMap<ParticipantId, ParticipantProfile>>>,
}

impl InMemoryProfileProvider {
    /// Creates an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider seeded with `profiles`
    #[must_use]
    pub fn from_profiles(profiles: impl IntoIterator<Item = ParticipantProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.participant_id, profile))
            .collect();
        Self {
            profiles: Arc::new(RwLock::new(profiles)),
        }
    }

    /// Insert or replace a profile.
    pub async fn upsert(&self, profile: ParticipantProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.participant_id, profile);
    }
}

impl ProfileProvider for InMemoryProfileProvider {
    fn profile(&self, participant_id: ParticipantId) -> ProfileFuture<'_, Option<ParticipantProfile>> {
        Box::pin(async move { Ok(self.profiles.read().await.get(&participant_id).cloned()) })
    }
}
