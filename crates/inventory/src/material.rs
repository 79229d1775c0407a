//! Material master data, read-only reference for the engine.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity};

use crate::quantity::Category;

/// Master record of a stock-keeping unit.
///
/// Owned by a governance process outside the engine; the engine never creates
/// or edits materials, it only resolves them by `product_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub product_code: String,
    pub name: String,
    pub category: Category,
    pub default_unit: String,
}

impl Material {
    pub fn new(
        product_code: impl Into<String>,
        name: impl Into<String>,
        category: Category,
        default_unit: impl Into<String>,
    ) -> DomainResult<Self> {
        let product_code = product_code.into();
        if product_code.trim().is_empty() {
            return Err(DomainError::validation("product_code cannot be empty"));
        }
        Ok(Self {
            product_code,
            name: name.into(),
            category,
            default_unit: default_unit.into(),
        })
    }
}

impl Entity for Material {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.product_code
    }
}
