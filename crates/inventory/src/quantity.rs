//! Category-agnostic view of a lot's remaining stock.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

use crate::precision::Amount;

/// Unit used for film rolls, whose remaining stock is tracked as length.
pub const METERS: &str = "m";

/// Material category; decides which quantity dimension is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Chemical,
    Film,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Chemical => "chemical",
            Category::Film => "film",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chemical" => Ok(Category::Chemical),
            "film" => Ok(Category::Film),
            other => Err(DomainError::validation(format!("unknown category: {other}"))),
        }
    }
}

/// Remaining stock of a lot.
///
/// Chemicals carry a scalar amount in an arbitrary unit (kg, L, ...); film
/// rolls carry their current length in meters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quantity {
    Scalar { amount: Amount, unit: String },
    Length { meters: Amount },
}

impl ValueObject for Quantity {}

impl Quantity {
    pub fn scalar(amount: Amount, unit: impl Into<String>) -> Self {
        Quantity::Scalar {
            amount,
            unit: unit.into(),
        }
    }

    pub fn length(meters: Amount) -> Self {
        Quantity::Length { meters }
    }

    /// The category this representation belongs to.
    pub fn category(&self) -> Category {
        match self {
            Quantity::Scalar { .. } => Category::Chemical,
            Quantity::Length { .. } => Category::Film,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            Quantity::Scalar { amount, .. } => *amount,
            Quantity::Length { meters } => *meters,
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            Quantity::Scalar { unit, .. } => unit,
            Quantity::Length { .. } => METERS,
        }
    }

    /// `(amount, unit)` pair, whatever the category.
    pub fn remaining(&self) -> (Amount, &str) {
        (self.amount(), self.unit())
    }

    /// Returns the quantity after applying a signed `delta`.
    ///
    /// Fails if the result would go negative.
    pub fn with_commit(&self, delta: Amount) -> DomainResult<Self> {
        let next = self
            .amount()
            .checked_add(delta)
            .ok_or_else(|| DomainError::invariant("quantity overflow"))?;
        if next.is_negative() {
            return Err(DomainError::invariant(format!(
                "quantity cannot go negative ({} {} + {})",
                self.amount(),
                self.unit(),
                delta
            )));
        }
        Ok(match self {
            Quantity::Scalar { unit, .. } => Quantity::Scalar {
                amount: next,
                unit: unit.clone(),
            },
            Quantity::Length { .. } => Quantity::Length { meters: next },
        })
    }
}
