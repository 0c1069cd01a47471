use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, SiteId, TenantId, TenantScoped};

use crate::location::LocationId;

entity_id!(
    /// Part identifier (tenant-scoped via `tenant_id`).
    PartId
);

entity_id!(
    /// Vendor identifier. Vendors themselves are managed elsewhere.
    VendorId
);

/// A purchasable/stockable item.
///
/// `quantity` is a denormalized mirror of the sum of the part's stock items; only
/// the ledger writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub id: PartId,
    pub tenant_id: TenantId,
    pub site_id: Option<SiteId>,
    pub name: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub quantity: i64,
    pub reorder_point: i64,
    pub min_level: i64,
    pub reorder_qty: i64,
    pub lead_time_days: u32,
    pub auto_reorder: bool,
    pub vendor_id: Option<VendorId>,
    /// Where auto-generated purchase orders deliver to.
    pub default_location_id: Option<LocationId>,
    /// Weighted-average unit cost in minor currency units.
    pub unit_cost: Option<i64>,
    pub last_auto_reorder_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a part in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPart {
    pub name: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub site_id: Option<SiteId>,
    #[serde(default)]
    pub settings: ReorderSettings,
    pub unit_cost: Option<i64>,
}

/// Reorder-related catalog attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderSettings {
    pub reorder_point: i64,
    pub min_level: i64,
    pub reorder_qty: i64,
    pub lead_time_days: u32,
    pub auto_reorder: bool,
    pub vendor_id: Option<VendorId>,
    pub default_location_id: Option<LocationId>,
}

impl ReorderSettings {
    pub fn validate(&self) -> DomainResult<()> {
        if self.reorder_point < 0 || self.min_level < 0 || self.reorder_qty < 0 {
            return Err(DomainError::invalid_input(
                "reorder point, minimum level and reorder quantity cannot be negative",
            ));
        }
        Ok(())
    }
}

impl Part {
    pub fn register(
        tenant_id: TenantId,
        id: PartId,
        input: NewPart,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::invalid_input("part name cannot be empty"));
        }
        if input.unit_cost.is_some_and(|c| c < 0) {
            return Err(DomainError::invalid_input("unit cost cannot be negative"));
        }
        input.settings.validate()?;

        let s = input.settings;
        Ok(Self {
            id,
            tenant_id,
            site_id: input.site_id,
            name: input.name.trim().to_string(),
            sku: input.sku,
            barcode: input.barcode,
            quantity: 0,
            reorder_point: s.reorder_point,
            min_level: s.min_level,
            reorder_qty: s.reorder_qty,
            lead_time_days: s.lead_time_days,
            auto_reorder: s.auto_reorder,
            vendor_id: s.vendor_id,
            default_location_id: s.default_location_id,
            unit_cost: input.unit_cost,
            last_auto_reorder_at: None,
            last_alert_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_settings(&mut self, settings: ReorderSettings, now: DateTime<Utc>) -> DomainResult<()> {
        settings.validate()?;
        self.reorder_point = settings.reorder_point;
        self.min_level = settings.min_level;
        self.reorder_qty = settings.reorder_qty;
        self.lead_time_days = settings.lead_time_days;
        self.auto_reorder = settings.auto_reorder;
        self.vendor_id = settings.vendor_id;
        self.default_location_id = settings.default_location_id;
        self.updated_at = now;
        Ok(())
    }

    /// Quantity at or below which the part counts as under-stocked.
    ///
    /// `min_level` wins when set, otherwise `reorder_point`.
    pub fn reorder_threshold(&self) -> i64 {
        if self.min_level > 0 {
            self.min_level
        } else {
            self.reorder_point
        }
    }

    /// How many units to order when restocking.
    ///
    /// Explicit `reorder_qty`, else the gap to `min_level`, else the gap to
    /// `reorder_point`, else `reorder_point`, else one.
    pub fn reorder_quantity(&self) -> i64 {
        if self.reorder_qty > 0 {
            return self.reorder_qty;
        }
        if self.min_level > 0 && self.min_level - self.quantity > 0 {
            return self.min_level - self.quantity;
        }
        if self.reorder_point > 0 && self.reorder_point - self.quantity > 0 {
            return self.reorder_point - self.quantity;
        }
        if self.reorder_point > 0 {
            return self.reorder_point;
        }
        1
    }

    /// Aggregate quantity after applying `delta` to one of the part's stock items.
    pub fn plan_quantity_change(&self, delta: i64) -> DomainResult<i64> {
        let next = self
            .quantity
            .checked_add(delta)
            .ok_or_else(|| DomainError::invalid_input("quantity out of range"))?;
        if next < 0 {
            return Err(DomainError::negative_result(format!(
                "part {} quantity would become {next}",
                self.id
            )));
        }
        Ok(next)
    }

    pub fn set_quantity(&mut self, quantity: i64, now: DateTime<Utc>) {
        self.quantity = quantity;
        self.updated_at = now;
    }

    /// Whether a quantity drop should create a draft purchase order now.
    pub fn auto_reorder_due(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if !self.auto_reorder || self.vendor_id.is_none() {
            return false;
        }
        let threshold = self.reorder_threshold();
        if threshold <= 0 || self.quantity > threshold {
            return false;
        }
        match self.last_auto_reorder_at {
            Some(last) => now - last >= cooldown,
            None => true,
        }
    }

    pub fn mark_auto_reordered(&mut self, now: DateTime<Utc>) {
        self.last_auto_reorder_at = Some(now);
        self.last_alert_at = Some(now);
        self.updated_at = now;
    }
}

impl Entity for Part {
    type Id = PartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Part {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
