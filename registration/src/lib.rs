//! Meet registration: admission and capacity engine.
//!
//! Admits participants into capacity-limited competitions ("meets"), keeps the
//! per-event seat count consistent under concurrent admissions, and tracks each
//! registration through review, payment and weigh-in.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!  admit ────────▶│  RegistrationEngine  │──── profile lookup ───▶ ProfileProvider
//!  transition     │   (attempt loop)     │
//!  withdraw       └──────────┬───────────┘
//!  payment / weigh-in        │ load            ┌────────────────────┐
//!                            ├────────────────▶│ RegistrationStore  │
//!                 ┌──────────▼───────────┐     │  (event + regs,    │
//!                 │ RegistrationReducer  │     │   versioned)       │
//!                 │  gate, fee, state    │     └─────────▲──────────┘
//!                 │  machines, ledger    │               │ one atomic commit
//!                 └──────────┬───────────┘───────────────┘
//!                            │ effects (after commit)
//!                            ▼
//!                 Notifier, cached revenue refresh
//! ```
//!
//! # Key Features
//!
//! ## 1. Capacity ledger mutated only inside the commit
//!
//! ```text
//! admitted_count == #registrations in {pending, approved, checked_in}
//! admitted_count <= capacity
//! ```
//!
//! The reducer adjusts the count in the same state that produces the
//! registration write, and the store applies both or neither, guarded by the
//! event version the count was read at. Concurrent admissions for the last seat
//! collide on that guard; the loser retries and is waitlisted.
//!
//! ## 2. One registration per participant per event
//!
//! Registrations are keyed by `(event, participant)`. Re-admitting a live
//! registration returns it unchanged; re-admitting after rejection or
//! withdrawal revives the same record.
//!
//! ## 3. Notifications outside the transaction
//!
//! Confirmation and status-change notifications are effects spawned after the
//! commit. Their failures are logged and counted, never reported to the caller.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod fee;
pub mod lifecycle;
pub mod metrics;
pub mod notifier;
pub mod profile;
pub mod stats;
pub mod store;
pub mod types;
pub mod validation;

pub use aggregate::{LedgerState, RegistrationAction, RegistrationEnvironment, RegistrationReducer};
pub use config::Config;
pub use engine::{Admission, RegistrationEngine};
pub use error::{RegistrationError, Resource};
pub use fee::{FeeSchedule, calculate_fee};
pub use lifecycle::{PaymentStatus, RegistrationStatus, SeatEffect};
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier};
pub use profile::{InMemoryProfileProvider, ParticipantProfile, ProfileProvider};
pub use stats::EventStats;
pub use store::{InMemoryRegistrationStore, PostgresRegistrationStore, RegistrationStore};
pub use types::*;
pub use validation::AdmissionDecision;
