//! # Meetreg Runtime
//!
//! Imperative shell pieces shared by the registration engine:
//!
//! - [`EffectExecutor`]: runs the effects a reducer returned, after the state
//!   they describe has been committed
//! - [`retry`]: jittered exponential backoff for conflicting commits
//! - [`metrics`]: Prometheus recorder installation and runtime metrics
//!
//! Effects are fire-and-forget from the caller's point of view. The executor
//! tracks how many are still in flight so that shutdown and tests can wait for
//! them to drain.

use futures::future::{BoxFuture, FutureExt, join_all};
use meetreg_core::effect::Effect;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub mod metrics;
pub mod retry;

use crate::metrics::EffectMetrics;

/// Spawns effects onto the tokio runtime and tracks in-flight work.
///
/// Cloning is cheap and clones share the same in-flight counter.
#[derive(Clone, Default)]
pub struct EffectExecutor {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl std::fmt::Debug for EffectExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Handle to a batch of spawned effects.
///
/// Dropping the handle does not cancel anything. Awaiting it yields the
/// actions the effects produced, in completion order for parallel effects
/// and in declaration order for sequential ones.
pub struct EffectHandle<A> {
    task: Option<JoinHandle<Vec<A>>>,
}

impl<A> EffectHandle<A> {
    /// Wait for the effects to finish and collect the actions they produced.
    ///
    /// A panicking effect yields no actions.
    pub async fn join(self) -> Vec<A> {
        match self.task {
            Some(task) => task.await.unwrap_or_else(|error| {
                tracing::error!(%error, "Effect task failed");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Whether nothing was spawned for this batch.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.task.is_none()
    }
}

impl EffectExecutor {
    /// Create an executor with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of effect batches spawned but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Spawn a batch of effects.
    ///
    /// Batches made only of no-ops are not spawned at all.
    #[tracing::instrument(skip_all, name = "execute_effects")]
    pub fn execute<A, I>(&self, effects: I) -> EffectHandle<A>
    where
        A: Send + 'static,
        I: IntoIterator<Item = Effect<A>>,
    {
        let effects: Vec<Effect<A>> = effects.into_iter().filter(|e| !e.is_noop()).collect();
        if effects.is_empty() {
            tracing::trace!("No effects to execute");
            return EffectHandle { task: None };
        }

        tracing::trace!(count = effects.len(), "Spawning effects");
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        EffectMetrics::record_pending(pending);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            idle: Arc::clone(&self.idle),
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();
            let actions = run_effect(Effect::Parallel(effects)).await;
            EffectMetrics::record_execution(started.elapsed());
            actions
        });

        EffectHandle { task: Some(task) }
    }

    /// Wait until every spawned effect batch has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait until idle or until `timeout` elapses.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_idle()).await.is_ok()
    }
}

/// Decrements the in-flight counter when an effect task ends, even on panic.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let remaining = self.pending.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        EffectMetrics::record_pending(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

fn run_effect<A>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>>
where
    A: Send + 'static,
{
    match effect {
        Effect::None => futures::future::ready(Vec::new()).boxed(),
        Effect::Future(fut) => fut.map(|action| action.into_iter().collect()).boxed(),
        Effect::Parallel(effects) => {
            join_all(effects.into_iter().map(run_effect))
                .map(|batches| batches.into_iter().flatten().collect())
                .boxed()
        },
    }
}
