//! Composite `(infinity, value)` link weight (component C1).
//!
//! `infinity` counts how many unreachable links a path crosses; `value` is the ordinary
//! cost. Comparison is lexicographic on `infinity` first, so Dijkstra and MST code can
//! walk through partially disconnected regions instead of refusing to compare them, while
//! still preferring paths that cross fewer unreachable links. This is a plain value type
//! with overflow-checked arithmetic, not a smart pointer.

use std::fmt;
use std::ops::{Add, Sub};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompositeWeight {
    pub infinity: u64,
    pub value: u64,
}

impl CompositeWeight {
    pub const ZERO: CompositeWeight = CompositeWeight {
        infinity: 0,
        value: 0,
    };
    pub const UNIT: CompositeWeight = CompositeWeight {
        infinity: 0,
        value: 1,
    };
    pub const MAX: CompositeWeight = CompositeWeight {
        infinity: u64::MAX,
        value: u64::MAX,
    };

    pub const fn new(value: u64) -> Self {
        Self { infinity: 0, value }
    }

    pub const fn infinite(value: u64) -> Self {
        Self { infinity: 1, value }
    }

    pub fn is_infinity(&self) -> bool {
        self.infinity > 0
    }

    /// Componentwise checked addition.
    pub fn checked_add(&self, rhs: CompositeWeight) -> Option<CompositeWeight> {
        Some(CompositeWeight {
            infinity: self.infinity.checked_add(rhs.infinity)?,
            value: self.value.checked_add(rhs.value)?,
        })
    }

    /// Componentwise checked subtraction.
    pub fn checked_sub(&self, rhs: CompositeWeight) -> Option<CompositeWeight> {
        Some(CompositeWeight {
            infinity: self.infinity.checked_sub(rhs.infinity)?,
            value: self.value.checked_sub(rhs.value)?,
        })
    }

    /// Increment `value` by one, leaving `infinity` untouched.
    pub fn incr(&self) -> CompositeWeight {
        CompositeWeight {
            infinity: self.infinity,
            value: self
                .value
                .checked_add(1)
                .expect("composite weight value overflow"),
        }
    }

    /// Decrement `value` by one, leaving `infinity` untouched.
    pub fn decr(&self) -> CompositeWeight {
        CompositeWeight {
            infinity: self.infinity,
            value: self
                .value
                .checked_sub(1)
                .expect("composite weight value underflow"),
        }
    }
}

impl Default for CompositeWeight {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Overflow aborts the process: this is an invariant violation (§7 class 4), not a
/// recoverable condition.
impl Add for CompositeWeight {
    type Output = CompositeWeight;
    fn add(self, rhs: CompositeWeight) -> CompositeWeight {
        self.checked_add(rhs).expect("composite weight overflow")
    }
}

impl Sub for CompositeWeight {
    type Output = CompositeWeight;
    fn sub(self, rhs: CompositeWeight) -> CompositeWeight {
        self.checked_sub(rhs).expect("composite weight underflow")
    }
}

impl fmt::Display for CompositeWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            write!(f, "inf{}+{}", self.infinity, self.value)
        } else {
            write!(f, "{}", self.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_order() {
        let a = CompositeWeight::new(1_000_000);
        let b = CompositeWeight::infinite(0);
        assert!(a < b, "any finite weight must be lighter than any infinite one");
        assert!(CompositeWeight::new(1) < CompositeWeight::new(2));
        assert!(CompositeWeight::infinite(1) < CompositeWeight::infinite(2));
    }

    #[test]
    fn add_then_sub_roundtrip() {
        let a = CompositeWeight::new(7);
        let b = CompositeWeight::infinite(3);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn trichotomy() {
        let vals = [
            CompositeWeight::ZERO,
            CompositeWeight::UNIT,
            CompositeWeight::new(5),
            CompositeWeight::infinite(5),
            CompositeWeight::MAX,
        ];
        for &a in &vals {
            for &b in &vals {
                let lt = a < b;
                let eq = a == b;
                let gt = a > b;
                assert_eq!([lt, eq, gt].iter().filter(|x| **x).count(), 1);
            }
        }
    }

    #[test]
    #[should_panic]
    fn overflow_aborts() {
        let _ = CompositeWeight::MAX + CompositeWeight::UNIT;
    }
}
