//! Fixed-point quantity arithmetic.
//!
//! Every stock quantity in the engine is an [`Amount`]: a signed count of
//! thousandths of the lot's unit. Planner and executor only ever add and
//! subtract integers, so repeated partial withdrawals cannot drift.
//!
//! Caller-facing quantities are [`Decimal`]s; they enter through
//! [`Amount::from_decimal`], which rounds to three places half away from zero.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use core::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

/// Number of fractional units per whole unit (3 decimal places).
pub const SCALE: i64 = 1_000;

/// Decimal places kept by [`Amount`].
pub const DECIMAL_PLACES: u32 = 3;

/// Smallest representable quantity; anything at or below it counts as exhausted.
pub const EPSILON: Amount = Amount(1);

/// Quantity in thousandths of a unit.
///
/// Serialized as the raw integer number of thousandths.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl ValueObject for Amount {}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Largest quantity one lot or one request may carry (10^12 units).
    ///
    /// Sums over thousands of such lots still fit in an `i64`.
    pub const MAX: Amount = Amount(1_000_000_000_000_000);

    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    pub const fn milli(self) -> i64 {
        self.0
    }

    /// Whole units, e.g. `Amount::from_units(5)` is `5.000`.
    pub const fn from_units(units: i64) -> Self {
        Self(units * SCALE)
    }

    /// Round a caller-supplied decimal to the nearest thousandth.
    ///
    /// Half-way values round away from zero, so `0.0005` becomes `0.001`.
    /// Magnitudes above [`Amount::MAX`] are rejected.
    pub fn from_decimal(value: Decimal) -> DomainResult<Self> {
        let rounded =
            value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero);
        if rounded.abs() > Self::MAX.to_decimal() {
            return Err(DomainError::validation(format!(
                "amount {value} exceeds the limit of {}",
                Self::MAX
            )));
        }
        rounded
            .checked_mul(Decimal::from(SCALE))
            .and_then(|scaled| scaled.to_i64())
            .map(Self)
            .ok_or_else(|| DomainError::validation(format!("amount out of range: {value}")))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, DECIMAL_PLACES)
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Whether the magnitude fits under [`Amount::MAX`].
    pub const fn is_within_limit(self) -> bool {
        self.0.unsigned_abs() <= Self::MAX.0 as u64
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Sum that reports overflow instead of wrapping.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Amount>) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(amount))
    }

    /// Remaining quantities at or below `threshold` are considered exhausted.
    pub fn is_exhausted(self, threshold: Amount) -> bool {
        self <= threshold
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::from_decimal(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_decimal(), f)
    }
}

impl FromStr for Amount {
    type Err = DomainError;

    /// Parse a plain decimal string (`"12"`, `"-0.5"`, `"3.14159"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| DomainError::validation(format!("invalid decimal amount {s:?}: {e}")))?;
        Amount::from_decimal(value)
    }
}
