//! Entity traits: identity + tenant ownership.

use crate::id::TenantId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Types that belong to exactly one tenant.
///
/// Stores use this to refuse cross-tenant writes; every persisted record in the
/// ledger implements it.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}
