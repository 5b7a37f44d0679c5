//! Out-of-band invocation metadata.

use super::{AsyncCancellableContext, AsyncInvocationId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Metadata group under which asynchronous invocation data is stored.
pub const METADATA_GROUP_ASYNC: &str = "asyncinvoke";

/// Metadata key holding the invocation's correlation id.
pub const METADATA_KEY_ID: &str = "UUID";

/// Grouped key/value metadata attached to an invocation by the
/// interception layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationMetadata {
    #[serde(default)]
    groups: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl InvocationMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value under the same key.
    pub fn set(
        &mut self,
        group: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.groups
            .entry(group.into())
            .or_default()
            .insert(key.into(), value)
    }

    /// Returns a stored value.
    #[must_use]
    pub fn get(&self, group: &str, key: &str) -> Option<&serde_json::Value> {
        self.groups.get(group).and_then(|entries| entries.get(key))
    }

    /// Removes a stored value.
    pub fn remove(&mut self, group: &str, key: &str) -> Option<serde_json::Value> {
        let entries = self.groups.get_mut(group)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Attaches the correlation id under the async group.
    pub fn attach_invocation_id(&mut self, id: AsyncInvocationId) {
        self.set(
            METADATA_GROUP_ASYNC,
            METADATA_KEY_ID,
            serde_json::Value::String(id.to_string()),
        );
    }

    /// Builder form of [`attach_invocation_id`](Self::attach_invocation_id).
    #[must_use]
    pub fn with_invocation_id(mut self, id: AsyncInvocationId) -> Self {
        self.attach_invocation_id(id);
        self
    }

    /// Returns the correlation id, if one is attached and well-formed.
    #[must_use]
    pub fn invocation_id(&self) -> Option<AsyncInvocationId> {
        self.get(METADATA_GROUP_ASYNC, METADATA_KEY_ID)
            .and_then(serde_json::Value::as_str)
            .and_then(AsyncInvocationId::parse)
    }

    /// Returns true if no metadata is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// View of an invocation as seen by the client future.
///
/// The interception layer produces these; the future only reads the
/// correlation id and the cancellable context from them.
pub trait AsyncInvocation: Send + Sync {
    /// Returns the invocation's metadata.
    fn metadata(&self) -> &InvocationMetadata;

    /// Returns the context capable of receiving cancellation requests.
    fn cancellable_context(&self) -> Arc<dyn AsyncCancellableContext>;

    /// Returns the correlation id carried in the metadata.
    fn invocation_id(&self) -> Option<AsyncInvocationId> {
        self.metadata().invocation_id()
    }
}

/// A plain [`AsyncInvocation`].
#[derive(Clone)]
pub struct Invocation {
    metadata: InvocationMetadata,
    context: Arc<dyn AsyncCancellableContext>,
}

impl Invocation {
    /// Creates an invocation with the given metadata and context.
    #[must_use]
    pub fn new(metadata: InvocationMetadata, context: Arc<dyn AsyncCancellableContext>) -> Self {
        Self { metadata, context }
    }

    /// Creates an invocation carrying a freshly minted correlation id.
    #[must_use]
    pub fn dispatched(context: Arc<dyn AsyncCancellableContext>) -> Self {
        let metadata = InvocationMetadata::new().with_invocation_id(AsyncInvocationId::new());
        Self::new(metadata, context)
    }

    /// Returns mutable access to the metadata.
    pub fn metadata_mut(&mut self) -> &mut InvocationMetadata {
        &mut self.metadata
    }
}

impl AsyncInvocation for Invocation {
    fn metadata(&self) -> &InvocationMetadata {
        &self.metadata
    }

    fn cancellable_context(&self) -> Arc<dyn AsyncCancellableContext> {
        Arc::clone(&self.context)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
