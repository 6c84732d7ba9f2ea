//! Safety capability bitset.
//!
//! Every built-in and every iterator carries an immutable safety
//! declaration obtained at construction; every execution context carries a
//! required floor. A call is permitted iff the callable's declaration is a
//! superset of the context's floor.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A finite set over the four named capabilities, represented as a bitset
/// so that subset checks are a single masked equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Safety(pub u8);

impl Safety {
    /// No declared capabilities. Bottom of the lattice.
    pub const NOT_SAFE: Self = Self(0);

    /// Bounded heap allocation.
    pub const MEM_SAFE: Self = Self(0x01);

    /// Bounded execution steps.
    pub const CPU_SAFE: Self = Self(0x02);

    /// Bounded wall-clock / step-budget exposure.
    pub const TIME_SAFE: Self = Self(0x04);

    /// No host I/O performed.
    pub const IO_SAFE: Self = Self(0x08);

    /// All four capabilities. Top of the lattice.
    pub const SAFE: Self = Self(
        Self::MEM_SAFE.0 | Self::CPU_SAFE.0 | Self::TIME_SAFE.0 | Self::IO_SAFE.0,
    );

    /// Returns `true` if `self` contains every capability in `other`,
    /// i.e. `other \ self = ∅`.
    pub fn contains(&self, other: Self) -> bool {
        (other.0 & !self.0) == 0
    }

    /// Fails unless `self` (the declared safety of a callable or iterator)
    /// is a superset of `required` (a context's floor).
    pub fn require(&self, required: Self) -> bool {
        self.contains(required)
    }

    /// Set intersection.
    pub fn intersect(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Set union.
    pub fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Builds a `Safety` from raw bits, rejecting any bit outside `SAFE`.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits <= 0xFF && (bits & !(Self::SAFE.0 as u32)) == 0 {
            Some(Self(bits as u8))
        } else {
            None
        }
    }

    /// `true` when no capability is declared.
    pub fn is_not_safe(&self) -> bool {
        self.0 == Self::NOT_SAFE.0
    }
}

impl BitOr for Safety {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for Safety {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NOT_SAFE {
            return write!(f, "NotSafe");
        }
        if *self == Self::SAFE {
            return write!(f, "Safe");
        }
        let names = [
            (Self::MEM_SAFE, "MemSafe"),
            (Self::CPU_SAFE, "CPUSafe"),
            (Self::TIME_SAFE, "TimeSafe"),
            (Self::IO_SAFE, "IOSafe"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag) && self.0 & flag.0 != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", parts.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_distinct_bits() {
        assert_eq!(Safety::NOT_SAFE.0, 0);
        assert_eq!(Safety::MEM_SAFE.0, 0x01);
        assert_eq!(Safety::CPU_SAFE.0, 0x02);
        assert_eq!(Safety::TIME_SAFE.0, 0x04);
        assert_eq!(Safety::IO_SAFE.0, 0x08);
        assert_eq!(Safety::SAFE.0, 0x0F);
    }

    #[test]
    fn contains_is_subset_check() {
        assert!(Safety::SAFE.contains(Safety::MEM_SAFE));
        assert!(Safety::SAFE.contains(Safety::SAFE));
        assert!(Safety::NOT_SAFE.contains(Safety::NOT_SAFE));
        assert!(!Safety::NOT_SAFE.contains(Safety::MEM_SAFE));
        assert!(!Safety::MEM_SAFE.contains(Safety::CPU_SAFE));
    }

    #[test]
    fn union_and_intersect() {
        let a = Safety::MEM_SAFE | Safety::CPU_SAFE;
        assert_eq!(a.0, 0x03);
        assert_eq!(a.intersect(Safety::CPU_SAFE), Safety::CPU_SAFE);
        assert_eq!(a.union(Safety::IO_SAFE).0, 0x0B);
    }

    #[test]
    fn display_renders_stable_strings() {
        assert_eq!(Safety::SAFE.to_string(), "Safe");
        assert_eq!(Safety::NOT_SAFE.to_string(), "NotSafe");
        assert_eq!(
            (Safety::MEM_SAFE | Safety::CPU_SAFE).to_string(),
            "MemSafe|CPUSafe"
        );
    }

    #[test]
    fn from_bits_rejects_unknown_bits() {
        assert_eq!(Safety::from_bits(0x0F), Some(Safety::SAFE));
        assert_eq!(Safety::from_bits(0x10), None);
        assert_eq!(Safety::from_bits(0x100), None);
    }
}
