//! 128-bit identifiers for every addressable entity.
//!
//! Populations, projections, endpoints and channels are all named by a `Uid`.
//! The nil value is reserved as "invalid/default" and never assigned to a
//! live entity.

use std::fmt;

use uuid::Uuid;

/// Unique identifier for an addressable entity (endpoint, population,
/// projection, channel).
///
/// Copied by value everywhere; routing tables key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Uid(Uuid);

impl Uid {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Uid(Uuid::new_v4())
    }

    /// The distinguished invalid/default identifier.
    pub const fn nil() -> Self {
        Uid(Uuid::nil())
    }

    /// Whether this is the invalid/default identifier.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The raw 16 bytes, for the wire codec.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuild from 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Uid(Uuid::from_bytes(bytes))
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_uids_are_unique() {
        let a = Uid::new();
        let b = Uid::new();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn nil_is_default() {
        assert_eq!(Uid::default(), Uid::nil());
        assert!(Uid::nil().is_nil());
    }

    #[test]
    fn byte_roundtrip() {
        let uid = Uid::new();
        assert_eq!(Uid::from_bytes(*uid.as_bytes()), uid);
    }
}
