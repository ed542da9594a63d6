//! Cascade bitmask controlling which stores participate in a mutation.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Selects which of {local cache, remote service, live broadcast}
/// participate in a save, remove, or get.
///
/// A pipeline stage requiring capability bits `b` executes its I/O only
/// when `cascade.contains(b)`. In-memory status transitions are never
/// gated; only I/O is.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cascade(u8);

impl Cascade {
    /// No store participates; the mutation is in-memory only.
    pub const NONE: Cascade = Cascade(0);
    /// Local cache only.
    pub const LOCAL: Cascade = Cascade(1);
    /// Remote REST service only.
    pub const REST: Cascade = Cascade(2);
    /// Local and remote, suppressing the live broadcast.
    pub const NO_LIVE: Cascade = Cascade(3);
    /// Live broadcast only.
    pub const LIVE: Cascade = Cascade(4);
    /// Local and live, skipping the remote service.
    pub const NO_REST: Cascade = Cascade(5);
    /// Remote service and live broadcast, skipping the local cache.
    pub const REMOTE: Cascade = Cascade(6);
    /// All three stores.
    pub const ALL: Cascade = Cascade(7);

    /// Creates a cascade from raw bits (masked to the valid range).
    pub const fn from_bits(bits: u8) -> Cascade {
        Cascade(bits & Self::ALL.0)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is present in `self`.
    pub const fn contains(self, other: Cascade) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is present in `self`.
    pub const fn intersects(self, other: Cascade) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no store participates.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Cascade {
    type Output = Cascade;

    fn bitor(self, rhs: Cascade) -> Cascade {
        Cascade(self.0 | rhs.0)
    }
}

impl BitAnd for Cascade {
    type Output = Cascade;

    fn bitand(self, rhs: Cascade) -> Cascade {
        Cascade(self.0 & rhs.0)
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Cascade::ALL
    }
}

impl serde::Serialize for Cascade {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Cascade {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Cascade, D::Error> {
        u8::deserialize(deserializer).map(Cascade::from_bits)
    }
}

impl fmt::Debug for Cascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(Cascade::LOCAL) {
            parts.push("Local");
        }
        if self.contains(Cascade::REST) {
            parts.push("Rest");
        }
        if self.contains(Cascade::LIVE) {
            parts.push("Live");
        }
        if parts.is_empty() {
            parts.push("None");
        }
        write!(f, "Cascade({})", parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_masks() {
        assert_eq!(Cascade::NO_LIVE, Cascade::LOCAL | Cascade::REST);
        assert_eq!(Cascade::NO_REST, Cascade::LOCAL | Cascade::LIVE);
        assert_eq!(Cascade::REMOTE, Cascade::REST | Cascade::LIVE);
        assert_eq!(Cascade::ALL, Cascade::NO_LIVE | Cascade::LIVE);
    }

    #[test]
    fn containment() {
        assert!(Cascade::ALL.contains(Cascade::REST));
        assert!(Cascade::NO_LIVE.contains(Cascade::LOCAL));
        assert!(!Cascade::NO_LIVE.contains(Cascade::LIVE));
        assert!(!Cascade::LOCAL.contains(Cascade::REMOTE));
        assert!(Cascade::NONE.is_none());
        assert!(Cascade::REMOTE.intersects(Cascade::LIVE));
        assert!(!Cascade::LOCAL.intersects(Cascade::REMOTE));
    }

    #[test]
    fn from_bits_masks_excess() {
        assert_eq!(Cascade::from_bits(0xFF), Cascade::ALL);
        assert_eq!(Cascade::from_bits(2), Cascade::REST);
    }

    #[test]
    fn serializes_as_bits() {
        assert_eq!(serde_json::to_string(&Cascade::NO_LIVE).unwrap(), "3");
        let parsed: Cascade = serde_json::from_str("6").unwrap();
        assert_eq!(parsed, Cascade::REMOTE);
    }

    #[test]
    fn debug_names_bits() {
        assert_eq!(format!("{:?}", Cascade::NO_REST), "Cascade(Local|Live)");
        assert_eq!(format!("{:?}", Cascade::NONE), "Cascade(None)");
    }
}
