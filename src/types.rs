//! Basic type definitions for the relay
//!
//! Provides the `ClientId` newtype. User and room names stay plain strings:
//! a room has no identity beyond its name.

use uuid::Uuid;

/// Unique client identifier (newtype pattern)
///
/// Assigned when a connection is admitted. Two clients can never share an
/// id, even when a user name is reused after a disconnect, so registry
/// removal and late connection events are matched by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_unique() {
        let id1 = ClientId::new();
        let id2 = ClientId::new();
        assert_ne!(id1, id2);
    }
}
