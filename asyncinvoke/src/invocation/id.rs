//! Correlation token for asynchronous invocations.

use crate::errors::ParseInvocationIdError;
use crate::utils::{generate_uuid, parse_uuid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Uniquely names one in-flight asynchronous invocation.
///
/// Generated once when the call is dispatched and carried alongside it
/// until the invocation is complete or abandoned. Immutable and cheap to
/// copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsyncInvocationId(Uuid);

impl AsyncInvocationId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(generate_uuid())
    }

    /// Parses an id, rejecting malformed and nil values.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_uuid(value).map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AsyncInvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AsyncInvocationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<AsyncInvocationId> for Uuid {
    fn from(id: AsyncInvocationId) -> Self {
        id.0
    }
}

impl fmt::Display for AsyncInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for AsyncInvocationId {
    type Err = ParseInvocationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseInvocationIdError { value: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| AsyncInvocationId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_and_parse() {
        let id = AsyncInvocationId::new();
        let parsed: AsyncInvocationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(AsyncInvocationId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_from_str_rejects_nil_like_parse() {
        let nil = Uuid::nil().to_string();
        assert_eq!(AsyncInvocationId::parse(&nil), None);

        let err = nil.parse::<AsyncInvocationId>().unwrap_err();
        assert_eq!(err.value, nil);
        assert!("garbage".parse::<AsyncInvocationId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let id = AsyncInvocationId::from(uuid);
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::json!(uuid.to_string()));
    }
}
