use std::{fmt, hash::Hash, marker::PhantomData};

/// A protocol-specific disable reason backed by a single bit.
///
/// Protocols implement this for a `#[repr(u64)]` enum whose variants are
/// distinct powers of two. A variant whose [`bits`](DisableReason::bits) is zero
/// means "no reason" and is ignored everywhere.
pub trait DisableReason: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Raw bit value of this reason.
    fn bits(self) -> u64;

    /// Whether this is the reserved zero reason.
    fn is_none(self) -> bool {
        self.bits() == 0
    }
}

/// A set of active [`DisableReason`]s stored as a plain bitmask.
///
/// Reasons are combined with integer OR / AND-NOT on their raw bits so the
/// reason type itself never needs bitwise operators.
pub struct DisableStates<R> {
    bits: u64,
    _reason: PhantomData<fn() -> R>,
}

impl<R: DisableReason> DisableStates<R> {
    /// The empty set.
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _reason: PhantomData,
        }
    }

    /// Build a set directly from raw bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits,
            _reason: PhantomData,
        }
    }

    /// Raw bitmask of the active reasons.
    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Whether no reason is active.
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether every bit of `reason` is active. The zero reason is never contained.
    pub fn contains(&self, reason: R) -> bool {
        let bits = reason.bits();
        bits != 0 && self.bits & bits == bits
    }

    /// Whether any bit of `other` is active.
    pub const fn intersects(&self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    /// Mark `reason` active.
    pub fn set(&mut self, reason: R) {
        self.bits |= reason.bits();
    }

    /// Mark `reason` inactive.
    pub fn clear(&mut self, reason: R) {
        self.bits &= !reason.bits();
    }
}

impl<R: DisableReason> FromIterator<R> for DisableStates<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let mut states = Self::empty();
        for reason in iter {
            states.set(reason);
        }
        states
    }
}

impl<R> Clone for DisableStates<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for DisableStates<R> {}

impl<R> PartialEq for DisableStates<R> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<R> Eq for DisableStates<R> {}

impl<R: DisableReason> Default for DisableStates<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R> fmt::Debug for DisableStates<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisableStates({:#x})", self.bits)
    }
}
