use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, LotId};

use crate::precision::{Amount, EPSILON};
use crate::quantity::{Category, Quantity};

/// Lifecycle status of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    InStock,
    /// Derived: remaining fell to the exhaustion threshold.
    Used,
    /// Administratively archived.
    Deleted,
}

impl LotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LotStatus::InStock => "in_stock",
            LotStatus::Used => "used",
            LotStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "in_stock" => Ok(LotStatus::InStock),
            "used" => Ok(LotStatus::Used),
            "deleted" => Ok(LotStatus::Deleted),
            other => Err(DomainError::validation(format!("unknown lot status: {other}"))),
        }
    }
}

/// Descriptive attributes that do not take part in allocation arithmetic,
/// except `weight_kg`, which mirrors a chemical lot's remaining amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotAttributes {
    pub weight_kg: Option<Amount>,
    pub width_mm: Option<u32>,
    pub expiry_date: Option<NaiveDate>,
    pub location: Option<String>,
}

/// Remaining-amount thresholds at or below which a lot counts as used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExhaustionPolicy {
    pub chemical: Amount,
    pub film: Amount,
}

impl Default for ExhaustionPolicy {
    fn default() -> Self {
        Self {
            chemical: EPSILON,
            film: EPSILON,
        }
    }
}

impl ExhaustionPolicy {
    pub fn threshold(&self, category: Category) -> Amount {
        match category {
            Category::Chemical => self.chemical,
            Category::Film => self.film,
        }
    }
}

/// One physical, independently trackable unit of stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLot {
    pub lot_id: LotId,
    /// Physical label; unique across every lot ever registered.
    pub unique_code: String,
    pub product_code: String,
    pub batch_number: Option<String>,
    pub quantity: Quantity,
    pub attributes: LotAttributes,
    pub status: LotStatus,
    /// Bumped on every stored mutation (optimistic concurrency).
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for InventoryLot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.lot_id
    }
}

impl InventoryLot {
    /// A freshly received lot, `in_stock` at version 1.
    pub fn receive(
        lot_id: LotId,
        unique_code: impl Into<String>,
        product_code: impl Into<String>,
        batch_number: Option<String>,
        quantity: Quantity,
        attributes: LotAttributes,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let unique_code = unique_code.into();
        if unique_code.trim().is_empty() {
            return Err(DomainError::validation("unique_code cannot be empty"));
        }
        let product_code = product_code.into();
        if product_code.trim().is_empty() {
            return Err(DomainError::validation("product_code cannot be empty"));
        }
        if !quantity.amount().is_positive() {
            return Err(DomainError::validation("initial quantity must be positive"));
        }
        if !quantity.amount().is_within_limit() {
            return Err(DomainError::validation(format!(
                "initial quantity {} exceeds the limit of {}",
                quantity.amount(),
                Amount::MAX
            )));
        }
        if quantity.unit().trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        let batch_number = batch_number.filter(|b| !b.trim().is_empty());

        Ok(Self {
            lot_id,
            unique_code,
            product_code,
            batch_number,
            quantity,
            attributes,
            status: LotStatus::InStock,
            version: 1,
            created_at: received_at,
            updated_at: received_at,
        })
    }

    pub fn category(&self) -> Category {
        self.quantity.category()
    }

    /// `(amount, unit)` regardless of category.
    pub fn remaining(&self) -> (Amount, &str) {
        self.quantity.remaining()
    }

    pub fn remaining_amount(&self) -> Amount {
        self.quantity.amount()
    }

    pub fn unit(&self) -> &str {
        self.quantity.unit()
    }

    /// Whether the planner may draw from this lot.
    pub fn is_allocatable(&self) -> bool {
        self.status == LotStatus::InStock && self.remaining_amount().is_positive()
    }

    /// New state after deducting `take`.
    ///
    /// Flips the status to `used` once the remainder reaches the policy
    /// threshold and keeps a chemical `weight_kg` mirror in step.
    pub fn deduct(
        &self,
        take: Amount,
        policy: &ExhaustionPolicy,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !take.is_positive() {
            return Err(DomainError::validation("deduction must be positive"));
        }
        if self.status != LotStatus::InStock {
            return Err(DomainError::invariant(format!(
                "lot {} is {}, not in stock",
                self.unique_code,
                self.status.as_str()
            )));
        }

        let quantity = self.quantity.with_commit(-take)?;
        let remaining = quantity.amount();

        let mut next = self.clone();
        if next.category() == Category::Chemical && next.attributes.weight_kg.is_some() {
            next.attributes.weight_kg = Some(remaining);
        }
        next.quantity = quantity;
        if remaining.is_exhausted(policy.threshold(next.category())) {
            next.status = LotStatus::Used;
        }
        next.version += 1;
        next.updated_at = at;
        Ok(next)
    }

    /// New state after an administrative archive.
    pub fn archive(&self, at: DateTime<Utc>) -> DomainResult<Self> {
        if self.status == LotStatus::Deleted {
            return Err(DomainError::validation(format!(
                "lot {} is already deleted",
                self.unique_code
            )));
        }
        let mut next = self.clone();
        next.status = LotStatus::Deleted;
        next.version += 1;
        next.updated_at = at;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chemical_lot(milli: i64) -> InventoryLot {
        InventoryLot::receive(
            LotId::new(),
            "T1",
            "CHEM-1",
            Some("B1".to_string()),
            Quantity::scalar(Amount::from_milli(milli), "kg"),
            LotAttributes {
                weight_kg: Some(Amount::from_milli(milli)),
                ..LotAttributes::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn receive_rejects_quantities_beyond_the_limit() {
        let over = Amount::MAX + EPSILON;
        let err = InventoryLot::receive(
            LotId::new(),
            "HUGE",
            "CHEM-1",
            None,
            Quantity::scalar(over, "kg"),
            LotAttributes::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("limit")));
        assert!(chemical_lot(Amount::MAX.milli()).is_allocatable());
    }

    #[test]
    fn deduct_mirrors_weight_and_bumps_version() {
        let lot = chemical_lot(100_000);
        let next = lot
            .deduct(Amount::from_units(30), &ExhaustionPolicy::default(), Utc::now())
            .unwrap();
        assert_eq!(next.remaining_amount(), Amount::from_units(70));
        assert_eq!(next.attributes.weight_kg, Some(Amount::from_units(70)));
        assert_eq!(next.status, LotStatus::InStock);
        assert_eq!(next.version, lot.version + 1);
        assert!(next.is_same_record(&lot));
    }

    #[test]
    fn full_deduction_marks_lot_used() {
        let lot = chemical_lot(5_000);
        let next = lot
            .deduct(Amount::from_units(5), &ExhaustionPolicy::default(), Utc::now())
            .unwrap();
        assert_eq!(next.status, LotStatus::Used);
        assert!(!next.is_allocatable());
    }

    #[test]
    fn remainder_at_threshold_counts_as_used() {
        let lot = chemical_lot(2);
        let next = lot
            .deduct(Amount::from_milli(1), &ExhaustionPolicy::default(), Utc::now())
            .unwrap();
        assert_eq!(next.remaining_amount(), Amount::from_milli(1));
        assert_eq!(next.status, LotStatus::Used);
    }

    #[test]
    fn film_threshold_is_configurable() {
        let lot = InventoryLot::receive(
            LotId::new(),
            "F1",
            "FILM-1",
            None,
            Quantity::length(Amount::from_units(10)),
            LotAttributes::default(),
            Utc::now(),
        )
        .unwrap();
        let policy = ExhaustionPolicy {
            film: Amount::from_milli(100),
            ..ExhaustionPolicy::default()
        };
        let next = lot
            .deduct(Amount::from_milli(9_950), &policy, Utc::now())
            .unwrap();
        assert_eq!(next.status, LotStatus::Used);
    }

    #[test]
    fn cannot_deduct_more_than_remaining() {
        let lot = chemical_lot(1_000);
        let err = lot
            .deduct(Amount::from_milli(1_001), &ExhaustionPolicy::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn archived_lot_rejects_deduction_and_second_archive() {
        let lot = chemical_lot(1_000).archive(Utc::now()).unwrap();
        assert_eq!(lot.status, LotStatus::Deleted);
        assert!(lot
            .deduct(Amount::from_milli(1), &ExhaustionPolicy::default(), Utc::now())
            .is_err());
        assert!(matches!(
            lot.archive(Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn receive_rejects_empty_label_and_non_positive_quantity() {
        let empty_label = InventoryLot::receive(
            LotId::new(),
            "  ",
            "CHEM-1",
            None,
            Quantity::scalar(Amount::from_units(1), "kg"),
            LotAttributes::default(),
            Utc::now(),
        );
        assert!(empty_label.is_err());

        let zero = InventoryLot::receive(
            LotId::new(),
            "T2",
            "CHEM-1",
            None,
            Quantity::scalar(Amount::ZERO, "kg"),
            LotAttributes::default(),
            Utc::now(),
        );
        assert!(zero.is_err());
    }
}
