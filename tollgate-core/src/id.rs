//! Prefixed event identifiers
//!
//! Events are identified Stripe-style as `{prefix}_{random}`, where the random
//! part is 96 bits of entropy encoded as URL-safe base64 without padding.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const EVENT_PREFIX: &str = "evt";

/// Generate a prefixed ID with 96 bits of entropy
///
/// # Example
/// ```
/// # use tollgate_core::id::generate_prefixed_id;
/// let id = generate_prefixed_id("evt");
/// assert!(id.starts_with("evt_"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that a prefixed ID has the expected format
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12,
        Err(_) => false,
    }
}

/// Unique identifier of a recorded authentication event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: &str) -> Self {
        EventId(id.to_string())
    }

    pub fn new_random() -> Self {
        EventId(generate_prefixed_id(EVENT_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        validate_prefixed_id(&self.0, EVENT_PREFIX)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate_prefixed_id("evt");
        assert!(id.starts_with("evt_"));

        let id2 = generate_prefixed_id("evt");
        assert_ne!(id, id2);
    }

    #[test]
    fn test_validate_prefixed_id() {
        let id = generate_prefixed_id("evt");
        assert!(validate_prefixed_id(&id, "evt"));
        assert!(!validate_prefixed_id(&id, "blk"));

        assert!(!validate_prefixed_id("evt", "evt"));
        assert!(!validate_prefixed_id("evt_", "evt"));
        assert!(!validate_prefixed_id("evt_invalid!", "evt"));
    }

    #[test]
    fn test_event_id_is_valid() {
        assert!(EventId::new_random().is_valid());
        assert!(!EventId::new("not-an-event").is_valid());
    }
}
