//! Correlation identifiers.
//!
//! The initiator stamps every command with a fresh id; the responder copies
//! it verbatim into the reply. Ids are only ever compared for equality.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Random bytes per id (rendered as twice as many hex characters).
const ID_BYTES: usize = 8;

/// Opaque token matching a command with its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Draw a new id with 64 bits of entropy, as 16 lowercase hex chars.
    ///
    /// Responders treat ids as opaque, so shorter ids minted by other
    /// initiators are matched just the same.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_format() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_ten_thousand_ids_are_unique() {
        let ids: HashSet<CorrelationId> = (0..10_000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CorrelationId::from("a1b2c3d4");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a1b2c3d4\"");
        let back: CorrelationId = serde_json::from_str("\"a1b2c3d4\"").unwrap();
        assert_eq!(back, id);
    }
}
