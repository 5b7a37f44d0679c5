//! UUID generation and parsing helpers.

use uuid::Uuid;

/// Generates a new random UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Parses a UUID from its hyphenated or simple string form.
///
/// Returns `None` for malformed input and for the nil UUID, which never
/// names a real invocation.
#[must_use]
pub fn parse_uuid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok().filter(|id| !id.is_nil())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_uuids_differ() {
        assert_ne!(generate_uuid(), generate_uuid());
    }

    #[test]
    fn test_parse_uuid_roundtrip_and_whitespace() {
        let id = generate_uuid();
        assert_eq!(parse_uuid(&format!("  {id} ")), Some(id));
        assert_eq!(parse_uuid(&id.simple().to_string()), Some(id));
    }

    #[test]
    fn test_parse_uuid_rejects_garbage_and_nil() {
        assert!(parse_uuid("not-a-uuid").is_none());
        assert!(parse_uuid(&Uuid::nil().to_string()).is_none());
    }
}
