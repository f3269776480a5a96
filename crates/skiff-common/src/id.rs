//! Network and endpoint ID generation and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{SkiffError, SkiffResult};

/// Maximum length of a network or endpoint ID.
pub const MAX_ID_LENGTH: usize = 64;

/// Checks the shared ID format.
///
/// IDs must:
/// - Be 1-64 characters long
/// - Contain only alphanumeric characters, hyphens, and underscores
/// - Start with an alphanumeric character
fn is_valid_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return false;
    }

    let mut chars = id.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Generates a 12-character hex ID derived from a UUID v4.
fn random_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    hex::encode(&uuid.as_bytes()[..6])
}

/// A validated network ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(String);

impl NetworkId {
    /// Create a new network ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> SkiffResult<Self> {
        let id = id.into();
        if !is_valid_id(&id) {
            return Err(SkiffError::InvalidNetworkId { id });
        }
        Ok(Self(id))
    }

    /// Generate a new random network ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Get the network ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short version of the ID (first 12 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        if self.0.len() <= 12 {
            &self.0
        } else {
            &self.0[..12]
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for NetworkId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated endpoint ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new endpoint ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> SkiffResult<Self> {
        let id = id.into();
        if !is_valid_id(&id) {
            return Err(SkiffError::InvalidEndpointId { id });
        }
        Ok(Self(id))
    }

    /// Generate a new random endpoint ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Get the endpoint ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for EndpointId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_network_ids() {
        assert!(NetworkId::new("abc123").is_ok());
        assert!(NetworkId::new("my-network").is_ok());
        assert!(NetworkId::new("my_network").is_ok());
        assert!(NetworkId::new("Network-123_test").is_ok());
    }

    #[test]
    fn invalid_network_ids() {
        assert!(NetworkId::new("").is_err());
        assert!(NetworkId::new("-invalid").is_err());
        assert!(NetworkId::new("_invalid").is_err());
        assert!(NetworkId::new("invalid!").is_err());
        assert!(NetworkId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn endpoint_id_error_kind() {
        let err = EndpointId::new("bad id").unwrap_err();
        assert!(matches!(err, SkiffError::InvalidEndpointId { .. }));
    }

    #[test]
    fn generate_ids() {
        let id1 = NetworkId::generate();
        let id2 = NetworkId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 12);
        assert_eq!(EndpointId::generate().as_str().len(), 12);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = NetworkId::new("net1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"net1\"");
    }

    proptest! {
        #[test]
        fn accepts_generated_valid_ids(id in "[a-zA-Z0-9][a-zA-Z0-9_-]{0,63}") {
            prop_assert!(NetworkId::new(id.clone()).is_ok());
            prop_assert!(EndpointId::new(id).is_ok());
        }

        #[test]
        fn rejects_ids_with_spaces(prefix in "[a-z]{1,10}", suffix in "[a-z]{0,10}") {
            let id = format!("{prefix} {suffix}");
            prop_assert!(NetworkId::new(id).is_err());
        }
    }
}
