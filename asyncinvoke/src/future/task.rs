//! The runnable unit of work behind a client future.

use super::result::{InvocationReturn, Outcome};
use super::state::Shared;
use crate::cancellation::CancellationToken;
use crate::errors::InvocationError;
use crate::events::{EVENT_COMPLETED, EVENT_FAILED};
use crate::invocation::AsyncInvocationId;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Body of an invocation.
pub type InvocationBody<V> =
    Box<dyn FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send>;

/// Lets a running body tell the future that execution left this process.
trait ProcessBoundary: Send + Sync {
    fn leave_process(&self);
}

impl<V: Send> ProcessBoundary for Shared<V> {
    fn leave_process(&self) {
        Shared::leave_process(self);
    }
}

/// What a running body can see of its own invocation.
pub struct TaskContext {
    id: AsyncInvocationId,
    interrupt: Arc<CancellationToken>,
    boundary: Arc<dyn ProcessBoundary>,
}

impl TaskContext {
    /// Returns the invocation id.
    #[must_use]
    pub fn invocation_id(&self) -> AsyncInvocationId {
        self.id
    }

    /// Returns true once the body has been asked to stop.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// Returns the token that fires when the body is asked to stop.
    #[must_use]
    pub fn interrupt_token(&self) -> &Arc<CancellationToken> {
        &self.interrupt
    }

    /// Declares that the work has been handed off outside this process.
    ///
    /// From now on local cancellation fails and the client future escalates
    /// interrupting cancellations to the cancellable context.
    pub fn leave_process(&self) {
        trace!(invocation_id = %self.id, "Execution left the local process");
        self.boundary.leave_process();
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

/// The scheduled half of an invocation, handed to a worker.
///
/// `run` executes the body at most once. A task dropped without running
/// fails its future, so waiters never hang on work that was discarded.
pub struct InvocationTask<V> {
    shared: Arc<Shared<V>>,
    body: Option<InvocationBody<V>>,
    remote: bool,
}

impl<V: Send + 'static> InvocationTask<V> {
    pub(crate) fn new(shared: Arc<Shared<V>>, body: InvocationBody<V>, remote: bool) -> Self {
        Self {
            shared,
            body: Some(body),
            remote,
        }
    }

    /// Returns the invocation id.
    #[must_use]
    pub fn invocation_id(&self) -> AsyncInvocationId {
        self.shared.id()
    }

    /// Returns the body's interrupt token.
    #[must_use]
    pub fn interrupt_token(&self) -> Arc<CancellationToken> {
        Arc::clone(self.shared.interrupt())
    }

    /// Returns true if the body executes outside this process from the start.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Executes the body on the calling thread and publishes its outcome.
    pub fn run(mut self) {
        let Some(body) = self.body.take() else {
            return;
        };
        let id = self.shared.id();

        if !self.shared.start(self.remote) {
            debug!(invocation_id = %id, "Invocation cancelled before it started");
            return;
        }
        trace!(invocation_id = %id, remote = self.remote, "Running invocation");

        let ctx = TaskContext {
            id,
            interrupt: Arc::clone(self.shared.interrupt()),
            boundary: self.shared.clone(),
        };

        let outcome: Outcome<V> = match catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
            Ok(Ok(ret)) => ret.unwrap_for(id),
            Ok(Err(error)) => Err(InvocationError::execution(error)),
            Err(panic) => Err(InvocationError::execution(anyhow::anyhow!(
                "invocation panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        self.publish(outcome);
    }

    fn publish(&self, outcome: Outcome<V>) {
        let id = self.shared.id();
        let event = match &outcome {
            Ok(value) => (EVENT_COMPLETED, json!({ "invocation_id": id.to_string(), "void": value.is_none() })),
            Err(error) => (EVENT_FAILED, json!({ "invocation_id": id.to_string(), "error": error.to_dict() })),
        };
        if let Err(error) = &outcome {
            if error.is_fatal() {
                warn!(invocation_id = %id, %error, "Invoked computation broke its return contract");
            }
        }

        if self.shared.complete(outcome) {
            self.shared.events().try_emit(event.0, Some(event.1));
        } else {
            debug!(invocation_id = %id, "Discarding outcome of cancelled invocation");
        }
    }
}

impl<V> Drop for InvocationTask<V> {
    fn drop(&mut self) {
        if self.body.take().is_some() && !self.shared.state().is_terminal() {
            let id = self.shared.id();
            warn!(invocation_id = %id, "Invocation task dropped before it ran");
            let abandoned = Err(InvocationError::execution(anyhow::anyhow!(
                "invocation {id} was dropped before it ran"
            )));
            if self.shared.complete(abandoned) {
                self.shared
                    .events()
                    .try_emit(EVENT_FAILED, Some(json!({ "invocation_id": id.to_string(), "abandoned": true })));
            }
        }
    }
}

impl<V> fmt::Debug for InvocationTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationTask")
            .field("shared", &self.shared)
            .field("remote", &self.remote)
            .field("ran", &self.body.is_none())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::future::state::TaskState;
    use pretty_assertions::assert_eq;

    fn task_with<F>(body: F) -> (Arc<Shared<i32>>, Arc<CollectingEventSink>, InvocationTask<i32>)
    where
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<i32>> + Send + 'static,
    {
        let sink = Arc::new(CollectingEventSink::new());
        let shared = Arc::new(Shared::new(AsyncInvocationId::new(), sink.clone()));
        let task = InvocationTask::new(Arc::clone(&shared), Box::new(body), false);
        (shared, sink, task)
    }

    #[test]
    fn test_run_publishes_unwrapped_value() {
        let (shared, sink, task) = task_with(|_| Ok(InvocationReturn::resolved(11)));
        task.run();

        assert_eq!(shared.state(), TaskState::Completed);
        assert_eq!(shared.peek().unwrap().unwrap(), Some(11));
        assert_eq!(sink.count_of(EVENT_COMPLETED), 1);
    }

    #[test]
    fn test_body_error_becomes_failure() {
        let (shared, sink, task) = task_with(|_| Err(anyhow::anyhow!("database down")));
        task.run();

        assert_eq!(shared.state(), TaskState::Failed);
        let err = shared.peek().unwrap().unwrap_err();
        assert!(err.to_string().contains("database down"));
        assert_eq!(sink.count_of(EVENT_FAILED), 1);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let (shared, _sink, task) = task_with(|_| panic!("kaboom"));
        task.run();

        let err = shared.peek().unwrap().unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_context_exposes_id_and_boundary() {
        let (shared, _sink, task) = task_with(|ctx| {
            ctx.leave_process();
            assert!(!ctx.is_interrupted());
            Ok(InvocationReturn::resolved(ctx.invocation_id().as_uuid().get_version_num() as i32))
        });
        task.run();
        assert_eq!(shared.peek().unwrap().unwrap(), Some(4));
    }

    #[test]
    fn test_cancelled_before_start_skips_body() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let (shared, sink, task) = task_with(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(InvocationReturn::void())
        });

        shared.cancel_locally(false);
        task.run();

        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(shared.state(), TaskState::Cancelled);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_dropped_task_fails_future() {
        let (shared, sink, task) = task_with(|_| Ok(InvocationReturn::void()));
        drop(task);

        assert_eq!(shared.state(), TaskState::Failed);
        assert!(shared.peek().unwrap().unwrap_err().to_string().contains("dropped"));
        assert_eq!(sink.count_of(EVENT_FAILED), 1);
    }
}
