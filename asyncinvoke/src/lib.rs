//! # Asyncinvoke
//!
//! Client-side handles for asynchronous invocations running in a container.
//!
//! A caller that dispatches work asynchronously gets back an
//! [`AsyncClientFuture`](future::AsyncClientFuture), which:
//!
//! - **Blocks for the result**: `get`, `get_timeout`, `get_interruptibly`,
//!   or `get_async` from async code
//! - **Unwraps nested results**: the invoked computation reports its value
//!   through its own pending-result handle, and callers only see the value
//! - **Cancels in two tiers**: local cancellation first, then, if execution
//!   has left the process and interruption is allowed, an out-of-band request
//!   to the container keyed by the invocation's correlation id
//!
//! ## Quick Start
//!
//! ```rust
//! use asyncinvoke::prelude::*;
//! use std::sync::Arc;
//!
//! let context = Arc::new(NoOpCancellableContext);
//! let (future, task) = AsyncClientFuture::new(
//!     |_ctx| Ok(InvocationReturn::resolved(42)),
//!     AsyncInvocationId::new(),
//!     context,
//! );
//!
//! // Normally a worker thread runs the task.
//! task.run();
//! assert_eq!(future.get().unwrap(), Some(42));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod future;
pub mod invocation;
pub mod invoker;
pub mod observability;
pub mod testing;
pub mod utils;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, InvocationRegistry};
    pub use crate::config::{DispatchMode, InvokerConfig, LoggingConfig};
    pub use crate::errors::{
        ConfigError, ExecutionFailure, InvocationError, InvocationResult, ParseInvocationIdError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::future::{
        AsyncClientFuture, AsyncResult, FutureBuilder, InvocationReturn, InvocationTask, Outcome,
        PendingResult, TaskContext, TaskState,
    };
    pub use crate::invocation::{
        AsyncCancellableContext, AsyncInvocation, AsyncInvocationId, ChannelCancellableContext,
        Invocation, InvocationMetadata, NoOpCancellableContext,
    };
    pub use crate::invoker::AsyncInvoker;
    pub use crate::observability::init_tracing;
}
