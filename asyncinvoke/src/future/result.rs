//! What an invoked computation hands back, and how it is unwrapped.

use crate::errors::{InvocationError, InvocationResult};
use crate::invocation::AsyncInvocationId;
use std::fmt;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// The final outcome observed by callers: `None` for a void invocation.
pub type Outcome<V> = InvocationResult<Option<V>>;

/// A pending-result handle a computation returns instead of its value.
///
/// Retrieval must not block: by the time the invocation's own task
/// finishes, the computation is required to have resolved the handle it
/// returned. An unresolved handle is reported as
/// [`InvocationError::NestedResultPending`] rather than waited on.
pub trait PendingResult<V>: Send {
    /// Returns the resolved outcome, or `None` if the handle is not resolved yet.
    fn try_resolve(self: Box<Self>) -> Option<Outcome<V>>;
}

/// The raw return value of an invoked computation.
pub enum InvocationReturn<V> {
    /// The computation returns nothing.
    Void,
    /// The computation returned its own pending-result handle.
    Pending(Box<dyn PendingResult<V>>),
    /// The computation returned a plain value, which breaks its contract.
    Plain {
        /// Type of the returned value.
        type_name: &'static str,
        /// Debug rendering of the returned value.
        value: String,
    },
}

impl<V> InvocationReturn<V> {
    /// A void return.
    #[must_use]
    pub fn void() -> Self {
        Self::Void
    }

    /// Wraps a pending-result handle.
    #[must_use]
    pub fn pending(handle: impl PendingResult<V> + 'static) -> Self {
        Self::Pending(Box::new(handle))
    }

    /// Records a plain value returned in place of a pending-result handle.
    #[must_use]
    pub fn plain<T: fmt::Debug>(value: T) -> Self {
        Self::Plain {
            type_name: std::any::type_name::<T>(),
            value: format!("{value:?}"),
        }
    }

    /// Unwraps the raw return into the caller-visible outcome.
    ///
    /// - `Void` becomes `Ok(None)`
    /// - `Plain` is a contract violation naming the value
    /// - `Pending` is resolved without blocking; its failure becomes ours
    pub(crate) fn unwrap_for(self, id: AsyncInvocationId) -> Outcome<V> {
        match self {
            Self::Void => Ok(None),
            Self::Plain { type_name, value } => {
                Err(InvocationError::ContractViolation { type_name, value })
            }
            Self::Pending(handle) => handle
                .try_resolve()
                .unwrap_or(Err(InvocationError::NestedResultPending { id })),
        }
    }
}

impl<V: Send + 'static> InvocationReturn<V> {
    /// Wraps an already-resolved value.
    #[must_use]
    pub fn resolved(value: V) -> Self {
        Self::pending(AsyncResult::new(value))
    }
}

impl<V> fmt::Debug for InvocationReturn<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("Void"),
            Self::Pending(_) => f.write_str("Pending(..)"),
            Self::Plain { type_name, value } => f
                .debug_struct("Plain")
                .field("type_name", type_name)
                .field("value", value)
                .finish(),
        }
    }
}

/// An already-resolved pending result.
///
/// The usual way for a computation to report its value.
#[derive(Debug)]
pub struct AsyncResult<V> {
    outcome: Outcome<V>,
}

impl<V> AsyncResult<V> {
    /// A result holding `value`.
    #[must_use]
    pub fn new(value: V) -> Self {
        Self {
            outcome: Ok(Some(value)),
        }
    }

    /// A result holding no value.
    #[must_use]
    pub fn empty() -> Self {
        Self { outcome: Ok(None) }
    }

    /// A result that failed.
    #[must_use]
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self {
            outcome: Err(InvocationError::execution(error)),
        }
    }
}

impl<V: Send> PendingResult<V> for AsyncResult<V> {
    fn try_resolve(self: Box<Self>) -> Option<Outcome<V>> {
        Some(self.outcome)
    }
}

impl<V: Send> PendingResult<V> for oneshot::Receiver<V> {
    fn try_resolve(mut self: Box<Self>) -> Option<Outcome<V>> {
        match self.try_recv() {
            Ok(value) => Some(Ok(Some(value))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(InvocationError::execution(anyhow::anyhow!(
                "nested result sender dropped without a value"
            )))),
        }
    }
}
