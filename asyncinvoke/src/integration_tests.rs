//! End-to-end tests for dispatching, waiting on and cancelling invocations.

#[cfg(test)]
mod tests {
    use crate::cancellation::InvocationRegistry;
    use crate::config::{DispatchMode, InvokerConfig};
    use crate::errors::InvocationError;
    use crate::events::{CollectingEventSink, EventSink, EVENT_CANCELLED, EVENT_CANCEL_ESCALATED, EVENT_COMPLETED};
    use crate::future::{AsyncClientFuture, FutureBuilder, InvocationReturn, TaskState};
    use crate::invocation::{
        AsyncCancellableContext, AsyncInvocationId, ChannelCancellableContext, NoOpCancellableContext,
    };
    use crate::invoker::AsyncInvoker;
    use crate::testing::{
        failing_body, resolved_body, until_interrupted, void_body, GatedWorker, RecordingCancellableContext,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tokio::runtime::Runtime;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_blocking_dispatch_returns_value() {
        let rt = runtime();
        let invoker =
            AsyncInvoker::new(rt.handle().clone(), Arc::new(NoOpCancellableContext), InvokerConfig::default()).unwrap();

        let future = invoker.invoke(resolved_body("pong".to_string())).unwrap();
        assert_eq!(future.get().unwrap(), Some("pong".to_string()));

        let void = invoker.invoke::<u8, _>(void_body()).unwrap();
        assert_eq!(void.get().unwrap(), None);
    }

    #[test]
    fn test_thread_dispatch_names_worker() {
        let rt = runtime();
        let config = InvokerConfig::new()
            .with_dispatch(DispatchMode::Thread)
            .with_thread_name_prefix("worker");
        let invoker = AsyncInvoker::new(rt.handle().clone(), Arc::new(NoOpCancellableContext), config).unwrap();

        let future = invoker
            .invoke(|_| {
                let name = thread::current().name().unwrap_or_default().to_string();
                Ok(InvocationReturn::resolved(name))
            })
            .unwrap();

        let name = future.get().unwrap().unwrap();
        assert!(name.starts_with("worker-"));
        assert!(name.ends_with(&future.invocation_id().as_uuid().simple().to_string()));
    }

    #[test]
    fn test_failure_surfaces_through_invoker() {
        let rt = runtime();
        let invoker =
            AsyncInvoker::new(rt.handle().clone(), Arc::new(NoOpCancellableContext), InvokerConfig::default()).unwrap();

        let future = invoker.invoke::<i32, _>(failing_body("no such account")).unwrap();
        let err = future.get().unwrap_err();
        assert!(matches!(err, InvocationError::Execution(_)));
        assert!(err.to_string().contains("no such account"));
    }

    #[test]
    fn test_remote_cancellation_escalates_through_registry() {
        let rt = runtime();
        let registry = Arc::new(InvocationRegistry::new());
        let invoker =
            AsyncInvoker::with_registry(rt.handle().clone(), registry.clone(), InvokerConfig::default()).unwrap();

        let future = invoker
            .invoke_remote::<i32, _>(until_interrupted(Duration::from_secs(5)))
            .unwrap();
        let id = future.invocation_id();
        wait_until(|| future.state() == TaskState::Running && registry.is_registered(id));

        // Execution left the process: a non-interrupting cancel cannot help.
        assert!(!future.cancel(false));
        assert_eq!(registry.request_count(), 0);

        assert!(future.cancel(true));
        let err = future.get().unwrap_err();
        assert!(err.to_string().contains("interrupted"));
        assert_eq!(registry.request_count(), 1);

        wait_until(|| registry.is_empty());
    }

    #[test]
    fn test_remote_cancellation_over_channel() {
        let rt = runtime();
        let registry = Arc::new(InvocationRegistry::new());
        let invoker = AsyncInvoker::with_channel(
            rt.handle().clone(),
            registry.clone(),
            InvokerConfig::new().with_cancel_channel_capacity(4),
        )
        .unwrap();

        let future = invoker
            .invoke_remote::<i32, _>(until_interrupted(Duration::from_secs(5)))
            .unwrap();
        let id = future.invocation_id();
        wait_until(|| registry.is_registered(id));

        assert!(future.cancel(true));
        assert!(future.get().unwrap_err().to_string().contains("interrupted"));
        assert!(registry.request_count() >= 1);
    }

    #[test]
    fn test_escalation_carries_this_invocations_id_once() {
        let registry = Arc::new(InvocationRegistry::new());
        let recorder = Arc::new(RecordingCancellableContext::forwarding(registry.clone()));
        let context: Arc<dyn AsyncCancellableContext> = recorder.clone();

        let (future, task) = FutureBuilder::new(AsyncInvocationId::new(), context)
            .remote(true)
            .build::<i32, _>(until_interrupted(Duration::from_secs(5)));
        let id = future.invocation_id();
        registry.register_with(id, task.interrupt_token());

        let mut worker = GatedWorker::spawn(task);
        worker.open();
        wait_until(|| future.state() == TaskState::Running);

        assert!(future.cancel(true));
        assert_eq!(recorder.requests(), vec![id]);

        assert!(future.get().is_err());
        // Terminal now: further cancels do nothing.
        assert!(!future.cancel(true));
        assert_eq!(recorder.count_for(id), 1);
        worker.finish();
    }

    #[test]
    fn test_pending_cancel_never_runs_body() {
        let recorder = Arc::new(RecordingCancellableContext::new());
        let sink = Arc::new(CollectingEventSink::new());
        let (future, task) = FutureBuilder::new(AsyncInvocationId::new(), recorder.clone())
            .event_sink(sink.clone())
            .build::<i32, _>(|_| panic!("body must not run"));

        let worker = GatedWorker::spawn(task);
        assert!(future.cancel(false));
        worker.finish();

        assert!(future.is_cancelled());
        assert!(matches!(future.get(), Err(InvocationError::Cancelled { .. })));
        assert!(recorder.is_empty());
        assert_eq!(sink.count_of(EVENT_CANCELLED), 1);
        assert_eq!(sink.count_of(EVENT_COMPLETED), 0);
    }

    #[test]
    fn test_timeout_then_full_get() {
        let (future, task) = AsyncClientFuture::new(
            resolved_body(7_u64),
            AsyncInvocationId::new(),
            Arc::new(NoOpCancellableContext),
        );
        let mut worker = GatedWorker::spawn(task);

        assert!(matches!(
            future.get_timeout(Duration::from_millis(15)),
            Err(InvocationError::Timeout { .. })
        ));

        worker.open();
        assert_eq!(future.get().unwrap(), Some(7));
        assert_eq!(future.get_timeout(Duration::from_millis(1)).unwrap(), Some(7));
        worker.finish();
    }

    #[test]
    fn test_cancel_racing_completion_is_linearizable() {
        for _ in 0..50 {
            let (future, task) = AsyncClientFuture::new(
                resolved_body(1_i32),
                AsyncInvocationId::new(),
                Arc::new(NoOpCancellableContext),
            );
            let observers: Vec<_> = (0..4)
                .map(|_| {
                    let future = future.clone();
                    thread::spawn(move || future.get().map_err(|e| e.kind()))
                })
                .collect();

            let worker = GatedWorker::spawn(task);
            let cancelled = future.cancel(true);
            worker.finish();

            let outcomes: Vec<_> = observers.into_iter().map(|o| o.join().unwrap()).collect();
            let expected = if cancelled { Err("cancelled") } else { Ok(Some(1)) };
            assert!(outcomes.iter().all(|o| *o == expected));
            assert!(!future.cancel(true));
        }
    }

    #[test]
    fn test_invoker_event_sink_receives_lifecycle() {
        let rt = runtime();
        let sink = Arc::new(CollectingEventSink::new());
        let recorder = Arc::new(RecordingCancellableContext::new());
        let events: Arc<dyn EventSink> = sink.clone();
        let invoker = AsyncInvoker::new(rt.handle().clone(), recorder.clone(), InvokerConfig::default())
            .unwrap()
            .with_event_sink(events);

        let done = invoker.invoke(resolved_body(1_i32)).unwrap();
        done.get().unwrap();

        let remote = invoker
            .invoke_remote::<i32, _>(until_interrupted(Duration::from_millis(200)))
            .unwrap();
        wait_until(|| remote.state() == TaskState::Running);
        assert!(remote.cancel(true));
        assert!(remote.get().is_err());

        wait_until(|| sink.count_of(EVENT_COMPLETED) == 1);
        assert_eq!(sink.count_of(EVENT_CANCEL_ESCALATED), 1);
        assert_eq!(
            sink.last_of(EVENT_CANCEL_ESCALATED),
            Some(serde_json::json!({ "invocation_id": remote.invocation_id().to_string() }))
        );
        assert_eq!(recorder.count_for(remote.invocation_id()), 1);
    }

    #[test]
    fn test_late_channel_escalation_leaves_no_residue() {
        let rt = runtime();
        let registry = Arc::new(InvocationRegistry::new());
        let (context, receiver) = ChannelCancellableContext::channel(8);
        let id = AsyncInvocationId::new();

        let (future, task) = FutureBuilder::new(id, Arc::new(context.clone()))
            .remote(true)
            .build::<i32, _>(resolved_body(4));
        registry.register_with(id, task.interrupt_token());
        task.run();
        registry.complete(id);
        assert_eq!(future.get().unwrap(), Some(4));

        // The request reaches the registry only after the work finished.
        context.cancel(id);
        drop(context);
        let target: Arc<dyn AsyncCancellableContext> = registry.clone();
        assert_eq!(rt.block_on(receiver.serve_into(target)), 1);

        assert!(!registry.is_cancel_requested(id));
        assert_eq!(registry.pending_early_cancellations(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let rt = runtime();
        let config = InvokerConfig::new().with_cancel_channel_capacity(0);
        let result = AsyncInvoker::new(rt.handle().clone(), Arc::new(NoOpCancellableContext), config);
        assert!(result.is_err());
    }

    #[test]
    fn test_get_async_from_runtime() {
        let rt = runtime();
        let invoker =
            AsyncInvoker::new(rt.handle().clone(), Arc::new(NoOpCancellableContext), InvokerConfig::default()).unwrap();
        let future = invoker.invoke(resolved_body(3_i32)).unwrap();

        let outcome = rt.block_on(async move {
            let observers = vec![future.clone(), future.clone(), future];
            futures::future::join_all(observers.iter().map(AsyncClientFuture::get_async)).await
        });

        assert!(outcome.iter().all(|o| matches!(o, Ok(Some(3)))));
    }
}
