//! Invocation identity and the container-facing contracts.
//!
//! This module provides:
//! - `AsyncInvocationId`, the correlation token naming one invocation
//! - `AsyncCancellableContext`, the container's out-of-band cancellation capability
//! - `InvocationMetadata` and `AsyncInvocation`, through which the
//!   interception layer hands the token to the client future

mod context;
mod id;
mod metadata;

pub use context::{
    AsyncCancellableContext, CancelRequest, CancelRequestReceiver, ChannelCancellableContext,
    NoOpCancellableContext,
};
pub use id::AsyncInvocationId;
pub use metadata::{AsyncInvocation, Invocation, InvocationMetadata, METADATA_GROUP_ASYNC, METADATA_KEY_ID};

#[cfg(test)]
pub use context::MockAsyncCancellableContext;
