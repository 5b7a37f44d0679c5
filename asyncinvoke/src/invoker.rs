//! Dispatching invocations onto worker threads.

use crate::cancellation::InvocationRegistry;
use crate::config::{DispatchMode, InvokerConfig};
use crate::errors::{ConfigError, InvocationResult};
use crate::events::{get_event_sink, EventSink, NoOpEventSink};
use crate::future::{AsyncClientFuture, FutureBuilder, InvocationReturn, InvocationTask, TaskContext};
use crate::invocation::{AsyncCancellableContext, CancelRequestReceiver, ChannelCancellableContext, Invocation};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Starts invocations and hands back their client futures.
///
/// Each call mints a fresh correlation id, records it in the invocation
/// metadata, builds the future from that metadata and runs the task on
/// the runtime's blocking pool or on a dedicated thread.
///
/// When backed by an [`InvocationRegistry`], every running task registers
/// its interrupt token there, so escalated cancellations reach the body.
pub struct AsyncInvoker {
    handle: Handle,
    context: Arc<dyn AsyncCancellableContext>,
    registry: Option<Arc<InvocationRegistry>>,
    events: Arc<dyn EventSink>,
    config: InvokerConfig,
}

impl AsyncInvoker {
    /// Creates an invoker whose futures escalate to `context`.
    pub fn new(
        handle: Handle,
        context: Arc<dyn AsyncCancellableContext>,
        config: InvokerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let events: Arc<dyn EventSink> = if config.emit_events {
            get_event_sink()
        } else {
            Arc::new(NoOpEventSink)
        };
        Ok(Self {
            handle,
            context,
            registry: None,
            events,
            config,
        })
    }

    /// Creates an invoker that escalates straight into `registry`.
    pub fn with_registry(
        handle: Handle,
        registry: Arc<InvocationRegistry>,
        config: InvokerConfig,
    ) -> Result<Self, ConfigError> {
        let context: Arc<dyn AsyncCancellableContext> = registry.clone();
        let mut invoker = Self::new(handle, context, config)?;
        invoker.registry = Some(registry);
        Ok(invoker)
    }

    /// Creates an invoker whose escalations travel over a bounded channel
    /// into `registry`, drained by a task on `handle`.
    pub fn with_channel(
        handle: Handle,
        registry: Arc<InvocationRegistry>,
        config: InvokerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (context, receiver) = ChannelCancellableContext::channel(config.cancel_channel_capacity);
        spawn_forwarder(&handle, receiver, registry.clone());

        let mut invoker = Self::new(handle, Arc::new(context), config)?;
        invoker.registry = Some(registry);
        Ok(invoker)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Overrides the event sink for futures created from now on.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Invokes `body` on a worker.
    pub fn invoke<V, F>(&self, body: F) -> InvocationResult<AsyncClientFuture<V>>
    where
        V: Send + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        self.dispatch(false, body)
    }

    /// Invokes `body` on a worker, treating its execution as remote from
    /// the start: local cancellation never applies once it runs.
    pub fn invoke_remote<V, F>(&self, body: F) -> InvocationResult<AsyncClientFuture<V>>
    where
        V: Send + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        self.dispatch(true, body)
    }

    fn dispatch<V, F>(&self, remote: bool, body: F) -> InvocationResult<AsyncClientFuture<V>>
    where
        V: Send + 'static,
        F: FnOnce(&TaskContext) -> anyhow::Result<InvocationReturn<V>> + Send + 'static,
    {
        let invocation = Invocation::dispatched(Arc::clone(&self.context));
        let (future, task) = FutureBuilder::from_invocation(&invocation)?
            .remote(remote)
            .event_sink(Arc::clone(&self.events))
            .build(body);

        let id = future.invocation_id();
        let registry = self.registry.clone();
        let job = move || run_registered(task, registry.as_deref());

        match self.config.dispatch {
            DispatchMode::Blocking => {
                drop(self.handle.spawn_blocking(job));
            }
            DispatchMode::Thread => {
                let name = format!("{}-{}", self.config.thread_name_prefix, id.as_uuid().simple());
                if let Err(e) = std::thread::Builder::new().name(name).spawn(job) {
                    // The job, and with it the task, was dropped: the future is already failed.
                    warn!(invocation_id = %id, error = %e, "Could not spawn invocation thread");
                }
            }
        }
        debug!(invocation_id = %id, remote, dispatch = ?self.config.dispatch, "Dispatched invocation");
        Ok(future)
    }
}

fn run_registered<V: Send + 'static>(task: InvocationTask<V>, registry: Option<&InvocationRegistry>) {
    let id = task.invocation_id();
    if let Some(registry) = registry {
        registry.register_with(id, task.interrupt_token());
    }
    task.run();
    if let Some(registry) = registry {
        registry.complete(id);
    }
}

fn spawn_forwarder(handle: &Handle, receiver: CancelRequestReceiver, registry: Arc<InvocationRegistry>) {
    handle.spawn(async move {
        let forwarded = receiver.serve_into(registry).await;
        debug!(forwarded, "Cancellation forwarder stopped");
    });
}

impl fmt::Debug for AsyncInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncInvoker")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
