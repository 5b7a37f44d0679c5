//! Client-side futures for asynchronous invocations.
//!
//! An invocation is split in two halves:
//! - `InvocationTask`, handed to whatever worker runs the computation
//! - `AsyncClientFuture`, kept by the caller to wait for, or cancel, it
//!
//! The computation returns an `InvocationReturn`: nothing, or its own
//! pending-result handle which the future unwraps without blocking.

mod client;
mod result;
mod state;
mod task;

pub use client::{AsyncClientFuture, FutureBuilder};
pub use result::{AsyncResult, InvocationReturn, Outcome, PendingResult};
pub use state::TaskState;
pub use task::{InvocationBody, InvocationTask, TaskContext};
