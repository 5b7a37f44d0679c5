//! Cooperative cancellation utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative interruption of running work and waiting callers
//! - InvocationRegistry, a container-side cancellable context keyed by invocation id

mod registry;
mod token;

pub use registry::{InvocationRegistry, DEFAULT_RETENTION};
pub use token::{CallbackId, CancelCallback, CancellationToken};
