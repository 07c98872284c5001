//! Outbound notifications.
//!
//! The engine tells the notifier about admissions and status changes after the
//! commit has landed. Calls run as spawned effects; a failure is logged and
//! counted, never surfaced to the caller of the operation that caused it.

use crate::lifecycle::RegistrationStatus;
use crate::types::{Event, Registration, RegistrationId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Notification delivery error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The downstream channel rejected or dropped the message
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Boxed future returned by [`Notifier`] methods.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Receiver of registration notifications.
///
/// Arguments are owned so implementations can move them into queued work.
pub trait Notifier: Send + Sync {
    /// A registration was created (or revived) as pending or waitlisted.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Delivery`] if the message could not be handed off.
    fn registration_confirmed(&self, registration: Registration, event: Event) -> NotifyFuture<'_>;

    /// A registration moved between statuses.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Delivery`] if the message could not be handed off.
    fn status_changed(
        &self,
        registration: Registration,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> NotifyFuture<'_>;
}

/// Notifier that only writes structured log lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    /// Creates a new `TracingNotifier`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn Notifier> {
        Arc::new(Self::new())
    }
}

impl Notifier for TracingNotifier {
    fn registration_confirmed(&self, registration: Registration, event: Event) -> NotifyFuture<'_> {
        Box::pin(async move {
            tracing::info!(
                registration = %registration.id,
                event = %event.name,
                status = %registration.status,
                fee = %registration.fee,
                "Registration confirmed"
            );
            Ok(())
        })
    }

    fn status_changed(
        &self,
        registration: Registration,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> NotifyFuture<'_> {
        Box::pin(async move {
            tracing::info!(registration = %registration.id, %from, %to, "Registration status changed");
            Ok(())
        })
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Admission confirmation
    Confirmed {
        /// Registration admitted
        registration_id: RegistrationId,
        /// Status at admission (pending or waitlisted)
        status: RegistrationStatus,
    },
    /// Status change
    StatusChanged {
        /// Registration that moved
        registration_id: RegistrationId,
        /// Previous status
        from: RegistrationStatus,
        /// New status
        to: RegistrationStatus,
    },
}

/// Notifier that records every call, optionally failing them.
///
/// Useful in tests that need to observe fire-and-forget notifications.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    attempts: Arc<AtomicUsize>,
    arrived: Arc<Notify>,
    fail: bool,
}

impl RecordingNotifier {
    /// Notifier whose calls all succeed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier whose calls are recorded but all fail
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Notifications recorded so far, in arrival order.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    /// Number of calls received, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` calls have arrived or `timeout` elapses.
    ///
    /// Returns `true` if the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.arrived.notified();
                if self.attempts() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    async fn record(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().await.push(notification);
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();
        if self.fail {
            return Err(NotifyError::Delivery("recording notifier set to fail".to_string()));
        }
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn registration_confirmed(&self, registration: Registration, _event: Event) -> NotifyFuture<'_> {
        Box::pin(self.record(Notification::Confirmed {
            registration_id: registration.id,
            status: registration.status,
        }))
    }

    fn status_changed(
        &self,
        registration: Registration,
        from: RegistrationStatus,
        to: RegistrationStatus,
    ) -> NotifyFuture<'_> {
        Box::pin(self.record(Notification::StatusChanged {
            registration_id: registration.id,
            from,
            to,
        }))
    }
}
