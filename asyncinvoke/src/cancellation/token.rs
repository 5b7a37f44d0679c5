//! Cancellation token for cooperative interruption.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// Handle returned by [`CancellationToken::on_cancel`], used to deregister
/// a callback that is no longer interesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    entries: Vec<(u64, CancelCallback)>,
}

/// A token for cooperative cancellation.
///
/// Invocation bodies poll it to notice that they were interrupted, and
/// waiting callers pass one to stop waiting. Cancellation is idempotent:
/// only the first reason is kept and callbacks fire exactly once.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: Mutex<Callbacks>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns true if this call performed the cancellation. Callbacks run
    /// on the calling thread after the token is marked; panics in callbacks
    /// are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let callbacks = {
            let mut callbacks = self.callbacks.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return false;
            }
            *self.reason.write() = Some(reason.into());
            std::mem::take(&mut callbacks.entries)
        };

        for (_, callback) in callbacks {
            run_callback(callback);
        }
        true
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately and `None`
    /// is returned.
    pub fn on_cancel<F>(&self, callback: F) -> Option<CallbackId>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.callbacks.lock();
            if !self.is_cancelled() {
                let id = callbacks.next_id;
                callbacks.next_id += 1;
                callbacks.entries.push((id, Box::new(callback)));
                return Some(CallbackId(id));
            }
        }

        run_callback(Box::new(callback));
        None
    }

    /// Removes a callback that has not fired yet.
    ///
    /// Returns true if the callback was still registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.entries.len();
        callbacks.entries.retain(|(entry, _)| *entry != id.0);
        callbacks.entries.len() < before
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Returns the number of callbacks waiting to fire.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.lock().entries.len()
    }
}

fn run_callback(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel("First reason"));
        assert!(!token.cancel("Second reason"));

        // First reason wins
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_before_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = token.on_cancel(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(id.is_some());
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");
        token.cancel("again");

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(token.pending_callbacks(), 0);
    }

    #[test]
    fn test_on_cancel_after_cancellation() {
        let token = CancellationToken::new();
        token.cancel("test");

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = token.on_cancel(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(id.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_removed_callback_does_not_fire() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let id = token
            .on_cancel(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(token.remove_callback(id));
        assert!(!token.remove_callback(id));

        token.cancel("test");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();

        token.on_cancel(|| {
            panic!("Intentional panic");
        });

        // Should not panic
        token.cancel("test");
        assert!(token.is_cancelled());
    }
}
