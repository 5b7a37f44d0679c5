//! Invocation bodies and worker helpers for tests.

use crate::future::{AsyncResult, InvocationReturn, InvocationTask, TaskContext};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A body that returns `value` through an [`AsyncResult`].
pub fn resolved_body<V: Send + 'static>(
    value: V,
) -> impl FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static {
    move |_| Ok(InvocationReturn::pending(AsyncResult::new(value)))
}

/// A body for a void invocation.
pub fn void_body<V: Send + 'static>() -> impl FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static {
    |_| Ok(InvocationReturn::void())
}

/// A body that fails with `message`.
pub fn failing_body<V: Send + 'static>(
    message: &'static str,
) -> impl FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static {
    move |_| Err(anyhow::anyhow!(message))
}

/// A body that spins until interrupted, then fails.
///
/// Gives up after `limit` so a broken test cannot hang forever.
pub fn until_interrupted<V: Send + 'static>(
    limit: Duration,
) -> impl FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static {
    move |ctx| {
        let deadline = std::time::Instant::now() + limit;
        while !ctx.is_interrupted() {
            if std::time::Instant::now() >= deadline {
                anyhow::bail!("body was never interrupted");
            }
            thread::sleep(Duration::from_millis(1));
        }
        anyhow::bail!("interrupted")
    }
}

/// Runs a task on its own thread once [`open`](Self::open) is called.
///
/// Dropping an unopened worker releases it anyway, so the task still runs.
#[derive(Debug)]
pub struct GatedWorker {
    gate: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl GatedWorker {
    /// Spawns the worker thread, holding `task` until opened.
    #[must_use]
    pub fn spawn<V: Send + 'static>(task: InvocationTask<V>) -> Self {
        let (gate, wait) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _ = wait.recv();
            task.run();
        });
        Self {
            gate: Some(gate),
            handle: Some(handle),
        }
    }

    /// Lets the task run.
    pub fn open(&mut self) {
        if let Some(gate) = self.gate.take() {
            let _ = gate.send(());
        }
    }

    /// Opens the gate and waits for the task to finish.
    pub fn finish(mut self) {
        self.open();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
