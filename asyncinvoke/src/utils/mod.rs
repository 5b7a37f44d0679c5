//! Utility functions for UUID generation and timestamp handling.

mod timestamps;
mod uuid_utils;

pub(crate) use timestamps::format_timestamp;
pub use timestamps::{iso_timestamp, now, Timestamp};
pub use uuid_utils::{generate_uuid, parse_uuid};
