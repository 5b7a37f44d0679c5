//! Testing utilities for invocation clients and containers.
//!
//! This module provides:
//! - A cancellable context that records every request
//! - Invocation bodies with common behaviours
//! - A gate for starting a task on a worker thread at a chosen moment

mod fixtures;
mod mocks;

pub use fixtures::{failing_body, resolved_body, until_interrupted, void_body, GatedWorker};
pub use mocks::RecordingCancellableContext;
