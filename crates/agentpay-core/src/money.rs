//! Integer minor-unit money. Floating point never touches a settling value (spec.md §3).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A non-negative amount in minor units (cents for USD, etc.) paired with a currency or
/// token code. Negative amounts are representable in arithmetic (subtraction) but rejected
/// at construction for monetary fields; callers that need a signed delta should use `i64`
/// directly, as the canonical ledger does for `delta_minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MinorUnits(pub i64);

impl MinorUnits {
    pub const ZERO: MinorUnits = MinorUnits(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn clamp_non_negative(self) -> Self {
        Self(self.0.max(0))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Dollars-equivalent threshold comparisons in the spec are always expressed in whole
    /// currency units (`$10`, `$1,000`); this converts assuming two decimal places, which is
    /// what every KYA/tier table in spec.md §4.2 assumes.
    pub fn from_major(major: i64) -> Self {
        Self(major * 100)
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for MinorUnits {
    type Output = MinorUnits;
    fn add(self, rhs: Self) -> Self::Output {
        MinorUnits(self.0 + rhs.0)
    }
}

impl Sub for MinorUnits {
    type Output = MinorUnits;
    fn sub(self, rhs: Self) -> Self::Output {
        MinorUnits(self.0 - rhs.0)
    }
}

impl std::iter::Sum for MinorUnits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        MinorUnits(iter.map(|m| m.0).sum())
    }
}

/// A discount applied to a cart subtotal, either a flat minor-unit amount or a percentage
/// in basis points (1/100 of a percent, so 1000 = 10%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    Fixed { amount_minor: i64 },
    Percentage { basis_points: u32 },
}

impl Discount {
    pub fn apply_to(&self, subtotal_minor: i64) -> i64 {
        match self {
            Discount::Fixed { amount_minor } => *amount_minor,
            Discount::Percentage { basis_points } => {
                (subtotal_minor * (*basis_points as i64)) / 10_000
            }
        }
    }
}

/// Round-half-up on a basis-point tax rate, matching the `round(subtotal * tax_rate)` rule
/// of spec.md §4.4.
pub fn apply_tax_rate_bps(subtotal_minor: i64, tax_rate_bps: u32) -> i64 {
    let numerator = subtotal_minor * tax_rate_bps as i64;
    // round-half-up against the /10_000 divisor
    (numerator + 5_000) / 10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_discount_applies_to_subtotal() {
        let d = Discount::Percentage { basis_points: 1000 };
        assert_eq!(d.apply_to(5_000), 500);
    }

    #[test]
    fn tax_rounds_half_up() {
        // 825 bps on 101 minor units = 8.3325 -> rounds to 8
        assert_eq!(apply_tax_rate_bps(101, 825), 8);
    }
}
