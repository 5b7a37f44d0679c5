//! Recording fakes for container collaborators.

use crate::invocation::{AsyncCancellableContext, AsyncInvocationId};
use parking_lot::Mutex;
use std::sync::Arc;

/// A cancellable context that records every request it receives.
///
/// Optionally forwards each request to another context, so tests can
/// observe escalations while still delivering them.
#[derive(Default)]
pub struct RecordingCancellableContext {
    requests: Mutex<Vec<AsyncInvocationId>>,
    forward_to: Option<Arc<dyn AsyncCancellableContext>>,
}

impl RecordingCancellableContext {
    /// Creates a recorder that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder that also forwards to `target`.
    #[must_use]
    pub fn forwarding(target: Arc<dyn AsyncCancellableContext>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            forward_to: Some(target),
        }
    }

    /// Returns every recorded request, in arrival order.
    #[must_use]
    pub fn requests(&self) -> Vec<AsyncInvocationId> {
        self.requests.lock().clone()
    }

    /// Returns how often `id` was requested.
    #[must_use]
    pub fn count_for(&self, id: AsyncInvocationId) -> usize {
        self.requests.lock().iter().filter(|r| **r == id).count()
    }

    /// Returns the total number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns true if nothing was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}

impl AsyncCancellableContext for RecordingCancellableContext {
    fn cancel(&self, id: AsyncInvocationId) {
        self.requests.lock().push(id);
        if let Some(target) = &self.forward_to {
            target.cancel(id);
        }
    }
}

impl std::fmt::Debug for RecordingCancellableContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingCancellableContext")
            .field("requests", &self.len())
            .field("forwarding", &self.forward_to.is_some())
            .finish()
    }
}
