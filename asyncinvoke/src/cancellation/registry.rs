//! Container-side registry of running invocations.

use super::CancellationToken;
use crate::invocation::{AsyncCancellableContext, AsyncInvocationId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long finished ids and unclaimed early cancellations are remembered.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// Expired entries are swept every this many registry operations.
const SWEEP_INTERVAL: u64 = 256;

/// What the registry knows about one id.
///
/// Every transition for an id happens inside a single `DashMap` entry, so
/// a cancellation and a registration for the same id are serialized.
#[derive(Debug)]
enum Slot {
    Running(Arc<CancellationToken>),
    CancelledEarly(Instant),
    Finished(Instant),
}

impl Slot {
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        match self {
            Self::Running(_) => false,
            Self::CancelledEarly(since) | Self::Finished(since) => now.duration_since(*since) >= retention,
        }
    }
}

/// Maps in-flight invocation ids to the interrupt tokens of the work
/// running on their behalf.
///
/// This is the receiving end of out-of-band cancellation: it implements
/// [`AsyncCancellableContext`] by firing the token registered under the
/// requested id. A request that arrives before its invocation registers
/// is remembered, and the invocation starts out cancelled. A request for
/// an invocation that already finished is dropped. Both kinds of
/// bookkeeping expire after the retention period.
pub struct InvocationRegistry {
    slots: DashMap<AsyncInvocationId, Slot>,
    retention: Duration,
    requests: AtomicU64,
    operations: AtomicU64,
}

impl Default for InvocationRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl InvocationRegistry {
    /// Creates an empty registry with [`DEFAULT_RETENTION`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that forgets finished ids and unclaimed
    /// early cancellations after `retention`.
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            retention,
            requests: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    /// Registers an invocation and returns its interrupt token.
    ///
    /// Registering the same id twice returns the same token.
    pub fn register(&self, id: AsyncInvocationId) -> Arc<CancellationToken> {
        self.register_with(id, Arc::new(CancellationToken::new()))
    }

    /// Registers an invocation under an existing interrupt token.
    ///
    /// If the id is already running the existing token is kept and returned.
    pub fn register_with(
        &self,
        id: AsyncInvocationId,
        token: Arc<CancellationToken>,
    ) -> Arc<CancellationToken> {
        let (token, cancelled_early) = match self.slots.entry(id) {
            Entry::Occupied(mut slot) => match slot.get() {
                Slot::Running(existing) => (Arc::clone(existing), false),
                Slot::CancelledEarly(_) => {
                    slot.insert(Slot::Running(Arc::clone(&token)));
                    (token, true)
                }
                Slot::Finished(_) => {
                    slot.insert(Slot::Running(Arc::clone(&token)));
                    (token, false)
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(Slot::Running(Arc::clone(&token)));
                (token, false)
            }
        };

        // Fired outside the entry so token callbacks may use the registry.
        if cancelled_early {
            debug!(invocation_id = %id, "Applying early cancellation request");
            token.cancel("cancellation requested before dispatch");
        }
        self.tick();
        token
    }

    /// Marks an invocation finished. Later cancellations for it are dropped.
    ///
    /// Returns true if the id was running.
    pub fn complete(&self, id: AsyncInvocationId) -> bool {
        let was_running = match self.slots.entry(id) {
            Entry::Occupied(mut slot) => {
                let was_running = matches!(slot.get(), Slot::Running(_));
                slot.insert(Slot::Finished(Instant::now()));
                was_running
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot::Finished(Instant::now()));
                false
            }
        };
        self.tick();
        was_running
    }

    /// Returns the token of a running invocation.
    #[must_use]
    pub fn token(&self, id: AsyncInvocationId) -> Option<Arc<CancellationToken>> {
        self.slots.get(&id).and_then(|slot| match slot.value() {
            Slot::Running(token) => Some(Arc::clone(token)),
            _ => None,
        })
    }

    /// Returns true if the id is running.
    #[must_use]
    pub fn is_registered(&self, id: AsyncInvocationId) -> bool {
        self.token(id).is_some()
    }

    /// Returns true if a cancellation for the id is in effect or waiting
    /// for it to register. Always false once the invocation finished.
    #[must_use]
    pub fn is_cancel_requested(&self, id: AsyncInvocationId) -> bool {
        self.slots.get(&id).is_some_and(|slot| match slot.value() {
            Slot::Running(token) => token.is_cancelled(),
            Slot::CancelledEarly(_) => true,
            Slot::Finished(_) => false,
        })
    }

    /// Returns the total number of cancellation requests received.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Returns the number of running invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Running(_)))
    }

    /// Returns true if nothing is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of cancellations waiting for their invocation to register.
    #[must_use]
    pub fn pending_early_cancellations(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::CancelledEarly(_)))
    }

    /// Returns the number of finished ids still remembered.
    #[must_use]
    pub fn finished_len(&self) -> usize {
        self.count(|slot| matches!(slot, Slot::Finished(_)))
    }

    /// Forgets finished ids and early cancellations older than the
    /// retention period. Returns how many entries were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.expired(now, self.retention));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            trace!(removed, "Pruned expired registry entries");
        }
        removed
    }

    fn count(&self, predicate: impl Fn(&Slot) -> bool) -> usize {
        self.slots.iter().filter(|entry| predicate(entry.value())).count()
    }

    fn tick(&self) {
        if self.operations.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.prune_expired();
        }
    }
}

impl AsyncCancellableContext for InvocationRegistry {
    fn cancel(&self, id: AsyncInvocationId) {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let running = match self.slots.entry(id) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Running(token) => Some(Arc::clone(token)),
                Slot::CancelledEarly(_) => {
                    debug!(invocation_id = %id, "Duplicate cancellation for unknown invocation");
                    None
                }
                Slot::Finished(_) => {
                    debug!(invocation_id = %id, "Cancellation for finished invocation dropped");
                    None
                }
            },
            Entry::Vacant(slot) => {
                debug!(invocation_id = %id, "Cancellation for unknown invocation recorded");
                slot.insert(Slot::CancelledEarly(Instant::now()));
                None
            }
        };

        if let Some(token) = running {
            if token.cancel("cancellation requested by client") {
                debug!(invocation_id = %id, "Interrupted running invocation");
            } else {
                debug!(invocation_id = %id, "Invocation already interrupted");
            }
        }
        self.tick();
    }
}

impl std::fmt::Debug for InvocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRegistry")
            .field("running", &self.len())
            .field("early", &self.pending_early_cancellations())
            .field("finished", &self.finished_len())
            .field("requests", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_register_returns_same_token() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();

        let a = registry.register(id);
        let b = registry.register(id);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_with_keeps_callers_token() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();
        let token = Arc::new(CancellationToken::new());

        let registered = registry.register_with(id, Arc::clone(&token));
        assert!(Arc::ptr_eq(&registered, &token));

        registry.cancel(id);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_fires_registered_token() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();
        let token = registry.register(id);

        registry.cancel(id);

        assert!(token.is_cancelled());
        assert!(registry.is_cancel_requested(id));
        assert_eq!(registry.request_count(), 1);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();
        let token = registry.register(id);

        registry.cancel(id);
        registry.cancel(id);

        assert!(token.is_cancelled());
        assert_eq!(registry.request_count(), 2);
    }

    #[test]
    fn test_early_cancellation_applies_on_register() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();

        registry.cancel(id);
        assert!(registry.is_cancel_requested(id));
        assert!(!registry.is_registered(id));
        assert_eq!(registry.pending_early_cancellations(), 1);

        let token = registry.register(id);
        assert!(token.is_cancelled());
        assert_eq!(registry.pending_early_cancellations(), 0);
    }

    #[test]
    fn test_complete_forgets_invocation() {
        let registry = InvocationRegistry::new();
        let id = AsyncInvocationId::new();
        registry.register(id);

        assert!(registry.complete(id));
        assert!(!registry.complete(id));
        assert!(registry.is_empty());

        // Cancelling a completed invocation is tolerated.
        registry.cancel(id);
        assert!(registry.token(id).is_none());
    }

    #[test]
    fn test_cancel_after_complete_is_not_remembered() {
        let registry = InvocationRegistry::new();

        for _ in 0..1000 {
            let id = AsyncInvocationId::new();
            registry.register(id);
            registry.complete(id);
            registry.cancel(id);
            assert!(!registry.is_cancel_requested(id));
        }

        assert_eq!(registry.pending_early_cancellations(), 0);
        assert_eq!(registry.request_count(), 1000);
    }

    #[test]
    fn test_expired_entries_are_pruned() {
        let registry = InvocationRegistry::with_retention(Duration::ZERO);
        let finished = AsyncInvocationId::new();
        let running = AsyncInvocationId::new();
        registry.register(finished);
        registry.complete(finished);
        registry.register(running);
        registry.cancel(AsyncInvocationId::new());

        assert_eq!(registry.prune_expired(), 2);
        assert_eq!(registry.finished_len(), 0);
        assert_eq!(registry.pending_early_cancellations(), 0);
        assert!(registry.is_registered(running));
    }

    #[test]
    fn test_periodic_sweep_bounds_tombstones() {
        let registry = InvocationRegistry::with_retention(Duration::ZERO);

        for _ in 0..SWEEP_INTERVAL * 4 {
            let id = AsyncInvocationId::new();
            registry.register(id);
            registry.complete(id);
            registry.cancel(id);
        }

        assert!(registry.finished_len() < usize::try_from(SWEEP_INTERVAL).unwrap());
        assert_eq!(registry.pending_early_cancellations(), 0);
    }

    #[test]
    fn test_concurrent_register_and_cancel_never_lose_request() {
        let registry = Arc::new(InvocationRegistry::new());
        let barrier = Arc::new(Barrier::new(2));

        for _ in 0..2000 {
            let id = AsyncInvocationId::new();

            let canceller = {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.cancel(id);
                })
            };
            barrier.wait();
            let token = registry.register(id);
            canceller.join().unwrap();

            assert!(token.is_cancelled());
            assert!(registry.complete(id));
        }

        assert_eq!(registry.pending_early_cancellations(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_cancellation_from_many_threads() {
        let registry = Arc::new(InvocationRegistry::new());
        let ids: Vec<_> = (0..8).map(|_| AsyncInvocationId::new()).collect();
        let tokens: Vec<_> = ids.iter().map(|id| registry.register(*id)).collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ids = ids.clone();
                thread::spawn(move || {
                    for id in ids {
                        registry.cancel(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(tokens.iter().all(|t| t.is_cancelled()));
        assert_eq!(registry.request_count(), 32);
    }
}
