//! Client view of an asynchronous invocation's return value.

use super::result::{InvocationReturn, Outcome, PendingResult};
use super::state::{LocalCancel, Shared, TaskState};
use super::task::{InvocationTask, TaskContext};
use crate::cancellation::CancellationToken;
use crate::errors::{InvocationError, InvocationResult};
use crate::events::{get_event_sink, EventSink, EVENT_CANCELLED, EVENT_CANCEL_ESCALATED};
use crate::invocation::{AsyncCancellableContext, AsyncInvocation, AsyncInvocationId};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Client view of one asynchronous invocation.
///
/// The invoked computation may report its value through a pending-result
/// handle of its own ([`InvocationReturn::Pending`]); the future unwraps it so
/// callers only ever see `None` (a void invocation) or the final value.
///
/// Clones share the same invocation, so any number of threads may wait on it
/// and all of them observe the same outcome.
///
/// Cancellation is two-tier: [`cancel`](Self::cancel) first tries to stop the
/// work locally and, if execution has already left this process and the
/// caller allows interruption, asks the cancellable context to cancel the
/// invocation by id.
pub struct AsyncClientFuture<V> {
    shared: Arc<Shared<V>>,
    context: Arc<dyn AsyncCancellableContext>,
}

/// Builds an [`AsyncClientFuture`] and the task that completes it.
pub struct FutureBuilder {
    id: AsyncInvocationId,
    context: Arc<dyn AsyncCancellableContext>,
    events: Option<Arc<dyn EventSink>>,
    remote: bool,
}

impl FutureBuilder {
    /// Starts a builder for the invocation `id`, cancellable through `context`.
    #[must_use]
    pub fn new(id: AsyncInvocationId, context: Arc<dyn AsyncCancellableContext>) -> Self {
        Self {
            id,
            context,
            events: None,
            remote: false,
        }
    }

    /// Starts a builder from an intercepted invocation.
    ///
    /// Fails when the invocation's metadata carries no correlation id.
    pub fn from_invocation(invocation: &dyn AsyncInvocation) -> InvocationResult<Self> {
        let id = invocation
            .invocation_id()
            .ok_or(InvocationError::MissingInvocationId)?;
        Ok(Self::new(id, invocation.cancellable_context()))
    }

    /// Marks the work as executing outside this process from the moment it starts.
    #[must_use]
    pub fn remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    /// Sets the sink for lifecycle events; defaults to the global sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Wraps a body that returns the raw invocation return.
    pub fn build<V, F>(self, body: F) -> (AsyncClientFuture<V>, InvocationTask<V>)
    where
        V: Send + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        let events = self.events.unwrap_or_else(get_event_sink);
        let shared = Arc::new(Shared::new(self.id, events));
        let task = InvocationTask::new(Arc::clone(&shared), Box::new(body), self.remote);
        let future = AsyncClientFuture {
            shared,
            context: self.context,
        };
        (future, task)
    }

    /// Wraps a body that runs for its side effects and then yields `result`.
    pub fn build_with_result<V, F>(
        self,
        body: F,
        result: InvocationReturn<V>,
    ) -> (AsyncClientFuture<V>, InvocationTask<V>)
    where
        V: Send + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.build(move |ctx| body(ctx).map(|()| result))
    }
}

impl fmt::Debug for FutureBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureBuilder")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl<V: Send + 'static> AsyncClientFuture<V> {
    /// Creates a future for invocation `id` and the task that completes it.
    ///
    /// Hand the task to a worker; keep the future.
    pub fn new<F>(
        body: F,
        id: AsyncInvocationId,
        context: Arc<dyn AsyncCancellableContext>,
    ) -> (Self, InvocationTask<V>)
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        FutureBuilder::new(id, context).build(body)
    }

    /// Creates a future from an intercepted invocation.
    pub fn from_invocation<F>(
        body: F,
        invocation: &dyn AsyncInvocation,
    ) -> InvocationResult<(Self, InvocationTask<V>)>
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        Ok(FutureBuilder::from_invocation(invocation)?.build(body))
    }
}

impl<V> AsyncClientFuture<V> {
    /// Returns the correlation id of the invocation.
    #[must_use]
    pub fn invocation_id(&self) -> AsyncInvocationId {
        self.shared.id()
    }

    /// Returns the current task state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Returns true once the invocation reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Returns true if the invocation was cancelled locally.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Attempts to stop the invocation.
    ///
    /// - Already terminal: returns false, nothing happens.
    /// - Local cancellation succeeds: the future is cancelled, returns true.
    /// - Execution has left the process and `may_interrupt_if_running`:
    ///   the cancellable context is asked to cancel this invocation's id and
    ///   true is returned without waiting for the container to act.
    /// - Otherwise returns false.
    pub fn cancel(&self, may_interrupt_if_running: bool) -> bool {
        let id = self.invocation_id();
        match self.shared.cancel_locally(may_interrupt_if_running) {
            LocalCancel::AlreadyTerminal => {
                trace!(invocation_id = %id, "Cannot cancel a completed invocation");
                false
            }
            LocalCancel::Cancelled => {
                debug!(invocation_id = %id, may_interrupt_if_running, "Cancelled invocation locally");
                self.shared.events().try_emit(
                    EVENT_CANCELLED,
                    Some(json!({ "invocation_id": id.to_string(), "interrupt": may_interrupt_if_running })),
                );
                true
            }
            LocalCancel::Refused if may_interrupt_if_running => {
                debug!(invocation_id = %id, "Escalating cancellation to the cancellable context");
                self.context.cancel(id);
                self.shared.events().try_emit(
                    EVENT_CANCEL_ESCALATED,
                    Some(json!({ "invocation_id": id.to_string() })),
                );
                true
            }
            LocalCancel::Refused => {
                trace!(invocation_id = %id, "Local cancellation refused and interruption not allowed");
                false
            }
        }
    }
}

impl<V: Clone> AsyncClientFuture<V> {
    /// Blocks until the invocation is terminal and returns its value.
    ///
    /// Returns `Ok(None)` for a void invocation. May be called any number of
    /// times; after completion it returns the same outcome immediately.
    pub fn get(&self) -> Outcome<V> {
        trace!(invocation_id = %self.invocation_id(), "Blocking request to get()");
        self.shared.wait()
    }

    /// Like [`get`](Self::get), failing with
    /// [`InvocationError::Timeout`] if `timeout` elapses first.
    ///
    /// A timeout does not consume the result; call again to retrieve it.
    pub fn get_timeout(&self, timeout: Duration) -> Outcome<V> {
        trace!(invocation_id = %self.invocation_id(), ?timeout, "Request to get() with timeout");
        self.shared.wait_for(timeout)
    }

    /// Returns the outcome if the invocation is terminal, without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<Outcome<V>> {
        self.shared.peek()
    }

    /// Waits for the outcome without blocking the current thread.
    pub async fn get_async(&self) -> Outcome<V> {
        self.shared.wait_async().await
    }
}

impl<V: Clone + Send + 'static> AsyncClientFuture<V> {
    /// Like [`get`](Self::get), failing with [`InvocationError::Interrupted`]
    /// as soon as `interrupt` is cancelled.
    pub fn get_interruptibly(&self, interrupt: &CancellationToken) -> Outcome<V> {
        trace!(invocation_id = %self.invocation_id(), "Interruptible request to get()");
        self.shared.wait_interruptibly(interrupt)
    }
}

impl<V: Clone + Send> PendingResult<V> for AsyncClientFuture<V> {
    fn try_resolve(self: Box<Self>) -> Option<Outcome<V>> {
        self.try_get()
    }
}

impl<V> Clone for AsyncClientFuture<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: Arc::clone(&self.context),
        }
    }
}

impl<V> fmt::Debug for AsyncClientFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncClientFuture")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}
