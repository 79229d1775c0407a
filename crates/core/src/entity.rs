//! Records with a stable identity.
//!
//! A lot stays the same lot while its remaining amount, status and version
//! change; a material is identified by its product code whatever its name.

/// Something tracked by identity rather than by value.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Two states of the same record, e.g. a lot before and after a deduction.
    fn is_same_record(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
