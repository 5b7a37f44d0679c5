//! Shared completion state of one invocation.

use super::result::Outcome;
use crate::cancellation::CancellationToken;
use crate::errors::InvocationError;
use crate::events::EventSink;
use crate::invocation::AsyncInvocationId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Lifecycle state of an invocation's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Scheduled, not yet picked up by a worker.
    Pending,
    /// A worker is executing the body.
    Running,
    /// Completed normally.
    Completed,
    /// Completed exceptionally.
    Failed,
    /// Cancelled before producing an outcome.
    Cancelled,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Result of an attempt to cancel without involving the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalCancel {
    /// Nothing to cancel.
    AlreadyTerminal,
    /// The invocation is now cancelled.
    Cancelled,
    /// Execution has left the process; only the container can stop it.
    Refused,
}

struct Inner<V> {
    state: TaskState,
    outcome: Option<Outcome<V>>,
    left_process: bool,
}

/// State shared between a client future, its clones and the task.
///
/// Every transition happens under `inner`; waiters block on `cond` or
/// await `notify`.
pub(crate) struct Shared<V> {
    id: AsyncInvocationId,
    inner: Mutex<Inner<V>>,
    cond: Condvar,
    notify: Notify,
    interrupt: Arc<CancellationToken>,
    events: Arc<dyn EventSink>,
}

impl<V> Shared<V> {
    pub(crate) fn new(id: AsyncInvocationId, events: Arc<dyn EventSink>) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                outcome: None,
                left_process: false,
            }),
            cond: Condvar::new(),
            notify: Notify::new(),
            interrupt: Arc::new(CancellationToken::new()),
            events,
        }
    }

    pub(crate) fn id(&self) -> AsyncInvocationId {
        self.id
    }

    pub(crate) fn interrupt(&self) -> &Arc<CancellationToken> {
        &self.interrupt
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    pub(crate) fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Moves `Pending` to `Running`. Returns false if the task must not run.
    pub(crate) fn start(&self, remote: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != TaskState::Pending {
            return false;
        }
        inner.state = TaskState::Running;
        inner.left_process = remote;
        true
    }

    /// Marks the running execution as having left the local process.
    pub(crate) fn leave_process(&self) {
        let mut inner = self.inner.lock();
        if inner.state == TaskState::Running {
            inner.left_process = true;
        }
    }

    /// Publishes the outcome unless a terminal state was reached first.
    pub(crate) fn complete(&self, outcome: Outcome<V>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = if outcome.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        inner.outcome = Some(outcome);
        drop(inner);

        self.wake_all();
        true
    }

    /// Attempts local cancellation.
    ///
    /// A pending task is always cancellable; a running one only while its
    /// execution is still in this process.
    pub(crate) fn cancel_locally(&self, may_interrupt_if_running: bool) -> LocalCancel {
        let mut inner = self.inner.lock();
        let was_running = match inner.state {
            state if state.is_terminal() => return LocalCancel::AlreadyTerminal,
            TaskState::Running if inner.left_process => return LocalCancel::Refused,
            state => state == TaskState::Running,
        };
        inner.state = TaskState::Cancelled;
        inner.outcome = Some(Err(InvocationError::Cancelled { id: self.id }));
        drop(inner);

        if was_running && may_interrupt_if_running {
            self.interrupt.cancel("invocation cancelled by client");
        }
        self.wake_all();
        LocalCancel::Cancelled
    }

    fn wake_all(&self) {
        self.cond.notify_all();
        self.notify.notify_waiters();
    }
}

impl<V: Clone> Shared<V> {
    /// Returns the outcome if terminal.
    pub(crate) fn peek(&self) -> Option<Outcome<V>> {
        self.inner.lock().outcome.clone()
    }

    /// Blocks until terminal.
    pub(crate) fn wait(&self) -> Outcome<V> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Blocks until terminal or until `timeout` elapses.
    pub(crate) fn wait_for(&self, timeout: Duration) -> Outcome<V> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut inner, deadline).timed_out() && inner.outcome.is_none() {
                        return Err(InvocationError::Timeout { timeout });
                    }
                }
                None => self.cond.wait(&mut inner),
            }
        }
    }

    /// Waits for the outcome without blocking the thread.
    pub(crate) async fn wait_async(&self) -> Outcome<V> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl<V: Clone + Send + 'static> Shared<V> {
    /// Blocks until terminal or until `interrupt` is cancelled.
    pub(crate) fn wait_interruptibly(
        self: &Arc<Self>,
        interrupt: &CancellationToken,
    ) -> Outcome<V> {
        let waker = Arc::clone(self);
        let callback = interrupt.on_cancel(move || {
            // Taking the lock orders the wakeup after the waiter's check.
            let _guard = waker.inner.lock();
            waker.cond.notify_all();
        });

        let outcome = {
            let mut inner = self.inner.lock();
            loop {
                if let Some(outcome) = &inner.outcome {
                    break outcome.clone();
                }
                if interrupt.is_cancelled() {
                    break Err(InvocationError::Interrupted);
                }
                self.cond.wait(&mut inner);
            }
        };

        if let Some(callback) = callback {
            interrupt.remove_callback(callback);
        }
        outcome
    }
}

impl<V> fmt::Debug for Shared<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("left_process", &inner.left_process)
            .finish()
    }
}
