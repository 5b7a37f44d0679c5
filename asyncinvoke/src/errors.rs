//! Error types for asynchronous invocations.
//!
//! Every failure a caller can observe through [`AsyncClientFuture`] is a
//! variant of [`InvocationError`]. Errors are `Clone` so that every observer
//! of one invocation receives an identical outcome.
//!
//! [`AsyncClientFuture`]: crate::future::AsyncClientFuture

use crate::invocation::AsyncInvocationId;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error type for invocation results.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    /// The timed `get` elapsed before the invocation reached a terminal state.
    #[error("Timed out after {timeout:?} waiting for invocation result")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The invoked computation, or its nested pending result, failed.
    #[error("Invocation failed: {0}")]
    Execution(#[from] ExecutionFailure),

    /// The waiting caller was interrupted.
    #[error("Interrupted while waiting for invocation result")]
    Interrupted,

    /// The invocation was cancelled before producing a result.
    #[error("Invocation {id} was cancelled")]
    Cancelled {
        /// The cancelled invocation.
        id: AsyncInvocationId,
    },

    /// The computation returned a value that is neither void nor a pending result.
    #[error(
        "Invoked computation has not returned a pending result handle, was instead: {value} ({type_name})"
    )]
    ContractViolation {
        /// The type actually returned.
        type_name: &'static str,
        /// Debug rendering of the returned value.
        value: String,
    },

    /// The nested pending result was not resolved when the outer task finished.
    #[error("Nested pending result of invocation {id} was not resolved when the invocation completed")]
    NestedResultPending {
        /// The invocation whose nested result was unresolved.
        id: AsyncInvocationId,
    },

    /// Invocation metadata carried no usable correlation id.
    #[error("Invocation metadata does not carry an async invocation id")]
    MissingInvocationId,
}

impl InvocationError {
    /// Creates an execution failure from any error.
    #[must_use]
    pub fn execution(error: impl Into<anyhow::Error>) -> Self {
        Self::Execution(ExecutionFailure::new(error))
    }

    /// Creates a contract violation for a plain returned value.
    #[must_use]
    pub fn contract_violation(type_name: &'static str, value: impl Into<String>) -> Self {
        Self::ContractViolation {
            type_name,
            value: value.into(),
        }
    }

    /// Returns true for programming errors of the invoked computation.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContractViolation { .. } | Self::NestedResultPending { .. } | Self::MissingInvocationId
        )
    }

    /// Returns true if calling `get` again may produce a different outcome.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Interrupted)
    }

    /// Returns a short machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Execution(_) => "execution",
            Self::Interrupted => "interrupted",
            Self::Cancelled { .. } => "cancelled",
            Self::ContractViolation { .. } => "contract_violation",
            Self::NestedResultPending { .. } => "nested_result_pending",
            Self::MissingInvocationId => "missing_invocation_id",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), json!(self.kind()));

        match self {
            Self::Timeout { timeout } => {
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                map.insert("timeout_ms".to_string(), json!(millis));
            }
            Self::Cancelled { id } | Self::NestedResultPending { id } => {
                map.insert("invocation_id".to_string(), json!(id.to_string()));
            }
            Self::ContractViolation { type_name, value } => {
                map.insert("type_name".to_string(), json!(type_name));
                map.insert("value".to_string(), json!(value));
            }
            Self::Execution(_) | Self::Interrupted | Self::MissingInvocationId => {}
        }

        map.insert("message".to_string(), json!(self.to_string()));
        map
    }
}

/// A failure raised by an invoked computation, shared between observers.
#[derive(Clone)]
pub struct ExecutionFailure {
    source: Arc<anyhow::Error>,
}

impl ExecutionFailure {
    /// Wraps an error.
    #[must_use]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            source: Arc::new(error.into()),
        }
    }

    /// Creates a failure from a message.
    #[must_use]
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(anyhow::Error::msg(message))
    }

    /// Returns the underlying error.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.source
    }

    /// Attempts to downcast the underlying error.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.source.downcast_ref::<E>()
    }
}

impl fmt::Debug for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.source, f)
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.source)
    }
}

impl std::error::Error for ExecutionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A value was out of range.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An environment variable could not be parsed.
    #[error("Could not parse environment variable {var}={value}")]
    InvalidEnv {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// A string that does not name an asynchronous invocation.
///
/// Malformed UUIDs and the nil UUID are both rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid async invocation id '{value}'")]
pub struct ParseInvocationIdError {
    /// The rejected input.
    pub value: String,
}

/// Result alias used throughout the crate.
pub type InvocationResult<T> = Result<T, InvocationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn test_execution_failure_preserves_source() {
        let err = InvocationError::execution(DiskFull);
        let InvocationError::Execution(failure) = &err else {
            panic!("expected execution failure");
        };

        assert!(failure.downcast_ref::<DiskFull>().is_some());
        assert_eq!(err.to_string(), "Invocation failed: disk full");
    }

    #[test]
    fn test_execution_failure_clone_shares_error() {
        let failure = ExecutionFailure::msg("boom");
        let clone = failure.clone();
        assert!(std::ptr::eq(failure.inner(), clone.inner()));
    }

    #[test]
    fn test_contract_violation_names_value() {
        let err = InvocationError::contract_violation("i32", "42");
        let message = err.to_string();

        assert!(message.contains("42"));
        assert!(message.contains("i32"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classification() {
        let timeout = InvocationError::Timeout {
            timeout: Duration::from_millis(5),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let cancelled = InvocationError::Cancelled {
            id: AsyncInvocationId::new(),
        };
        assert!(!cancelled.is_retryable());
        assert!(!cancelled.is_fatal());
        assert!(InvocationError::MissingInvocationId.is_fatal());
    }

    #[test]
    fn test_to_dict() {
        let err = InvocationError::Timeout {
            timeout: Duration::from_millis(250),
        };
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "timeout");
        assert_eq!(dict.get("timeout_ms").unwrap(), 250);
    }

    #[test]
    fn test_to_dict_saturates_huge_timeout() {
        let err = InvocationError::Timeout { timeout: Duration::MAX };
        assert_eq!(err.to_dict().get("timeout_ms").unwrap(), &json!(u64::MAX));
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::invalid_value("cancel_channel_capacity", "must be positive");
        assert!(err.to_string().contains("cancel_channel_capacity"));
    }
}
