use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, SiteId, TenantId, TenantScoped};

use crate::location::LocationId;
use crate::part::PartId;

entity_id!(
    /// Ledger cell identifier.
    StockItemId
);

/// Unique key of a ledger cell within a tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub part_id: PartId,
    pub location_id: LocationId,
}

impl StockKey {
    pub fn new(part_id: PartId, location_id: LocationId) -> Self {
        Self {
            part_id,
            location_id,
        }
    }
}

/// On-hand quantity of one part at one location.
///
/// Created lazily at zero on first mutation; never deleted once it has history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: StockItemId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: LocationId,
    pub site_id: Option<SiteId>,
    pub quantity: i64,
    pub unit_cost: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated quantity change for one stock item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub before: i64,
    pub after: i64,
    pub delta: i64,
}

impl StockItem {
    pub fn empty(
        tenant_id: TenantId,
        key: StockKey,
        site_id: Option<SiteId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: StockItemId::generate(),
            tenant_id,
            part_id: key.part_id,
            location_id: key.location_id,
            site_id,
            quantity: 0,
            unit_cost: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.part_id, self.location_id)
    }

    pub fn plan_receive(&self, quantity: i64) -> DomainResult<StockChange> {
        ensure_positive(quantity)?;
        self.change(quantity)
    }

    /// Fails with `InsufficientStock` rather than going below zero.
    pub fn plan_issue(&self, quantity: i64) -> DomainResult<StockChange> {
        ensure_positive(quantity)?;
        if quantity > self.quantity {
            return Err(DomainError::InsufficientStock {
                requested: quantity,
                available: self.quantity,
            });
        }
        self.change(-quantity)
    }

    pub fn plan_adjust(&self, delta: i64) -> DomainResult<StockChange> {
        if delta == 0 {
            return Err(DomainError::invalid_input("adjustment delta cannot be zero"));
        }
        let change = self.change(delta)?;
        if change.after < 0 {
            return Err(DomainError::negative_result(format!(
                "adjusting {} by {delta} would leave {}",
                self.quantity, change.after
            )));
        }
        Ok(change)
    }

    /// Delta is `counted - current`; a count matching the books is a zero delta.
    pub fn plan_count(&self, counted: i64) -> DomainResult<StockChange> {
        if counted < 0 {
            return Err(DomainError::negative_result(format!(
                "counted quantity {counted} is negative"
            )));
        }
        self.change(counted - self.quantity)
    }

    pub fn apply(&mut self, change: StockChange, now: DateTime<Utc>) {
        debug_assert_eq!(change.before, self.quantity);
        self.quantity = change.after;
        self.updated_at = now;
    }

    fn change(&self, delta: i64) -> DomainResult<StockChange> {
        let after = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invalid_input("quantity out of range"))?;
        Ok(StockChange {
            before: self.quantity,
            after,
            delta,
        })
    }
}

pub fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::invalid_input(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    Ok(())
}

impl Entity for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for StockItem {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
