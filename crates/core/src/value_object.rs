//! Value object trait: equality by value, not identity.
//!
//! Quantities, amounts and selections are value objects: two lots holding
//! `Scalar { 5.000, "kg" }` hold the same quantity regardless of which lot it is.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new value (see `Quantity::with_commit`).
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Amount(i64);
///
/// impl ValueObject for Amount {}
///
/// assert_eq!(Amount(100), Amount(100));
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
