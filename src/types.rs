//! Basic type definitions for the chat server.
//!
//! Provides the `ClientId` newtype used as the primary key for the
//! connection table and the user roster.

/// Unique client identifier (newtype pattern)
///
/// Wraps the monotone counter assigned by the accept loop, starting at 1.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
