use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, SiteId, TenantId, TenantScoped};
use cmms_inventory::{LocationId, Part, PartId, VendorId};

entity_id!(
    /// Purchase order identifier (tenant-scoped via `tenant_id`).
    PurchaseOrderId
);

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Draft,
    Pending,
    Approved,
    Ordered,
    Received,
    Closed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub const ALL: [PurchaseOrderStatus; 7] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Pending,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Ordered,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::Closed,
        PurchaseOrderStatus::Cancelled,
    ];

    /// Statuses whose outstanding lines count as on-order demand.
    pub const ON_ORDER: [PurchaseOrderStatus; 3] = [
        PurchaseOrderStatus::Pending,
        PurchaseOrderStatus::Approved,
        PurchaseOrderStatus::Ordered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Pending => "pending",
            PurchaseOrderStatus::Approved => "approved",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Closed => "closed",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }

    /// The allowed-edges table.
    pub fn can_transition_to(self, to: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, to),
            (Draft, Pending)
                | (Pending, Approved)
                | (Approved, Ordered)
                | (Ordered, Received)
                | (Received, Closed)
                | (Draft | Pending | Approved | Ordered, Cancelled)
        )
    }

    pub fn accepts_receipts(self) -> bool {
        matches!(self, PurchaseOrderStatus::Approved | PurchaseOrderStatus::Ordered)
    }

    pub fn counts_as_on_order(self) -> bool {
        Self::ON_ORDER.contains(&self)
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::invalid_input(format!("unknown purchase order status '{s}'")))
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderLine {
    pub line_no: u32,
    pub part_id: PartId,
    /// Delivery location; a receipt may name one instead.
    pub location_id: Option<LocationId>,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    /// Minor currency units.
    pub unit_cost: i64,
}

impl PurchaseOrderLine {
    pub fn outstanding(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }
}

/// Input for one line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLine {
    pub part_id: PartId,
    pub location_id: Option<LocationId>,
    pub quantity: i64,
    pub unit_cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub tenant_id: TenantId,
    pub site_id: Option<SiteId>,
    pub vendor_id: VendorId,
    pub number: String,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PurchaseOrderLine>,
    pub auto_generated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one receipt did to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineReceipt {
    pub line_no: u32,
    pub part_id: PartId,
    /// Units actually accepted after clamping to the ordered quantity.
    pub accepted: i64,
    pub quantity_received: i64,
    pub unit_cost: i64,
    pub location_id: Option<LocationId>,
    pub order_status: PurchaseOrderStatus,
}

impl PurchaseOrder {
    pub fn draft(
        tenant_id: TenantId,
        vendor_id: VendorId,
        number: impl Into<String>,
        lines: Vec<NewLine>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let number = number.into();
        if number.trim().is_empty() {
            return Err(DomainError::invalid_input("purchase order number is required"));
        }
        if lines.is_empty() {
            return Err(DomainError::invalid_input("purchase order needs at least one line"));
        }
        let mut built = Vec::with_capacity(lines.len());
        for (idx, line) in lines.into_iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::invalid_input("line quantity must be positive"));
            }
            if line.unit_cost < 0 {
                return Err(DomainError::invalid_input("line unit cost cannot be negative"));
            }
            built.push(PurchaseOrderLine {
                line_no: u32::try_from(idx + 1)
                    .map_err(|_| DomainError::invalid_input("too many purchase order lines"))?,
                part_id: line.part_id,
                location_id: line.location_id,
                quantity_ordered: line.quantity,
                quantity_received: 0,
                unit_cost: line.unit_cost,
            });
        }
        Ok(Self {
            id: PurchaseOrderId::generate(),
            tenant_id,
            site_id: None,
            vendor_id,
            number,
            status: PurchaseOrderStatus::Draft,
            lines: built,
            auto_generated: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Draft created by the ledger when an auto-reorder part drops to threshold.
    pub fn auto_reorder_draft(part: &Part, quantity: i64, now: DateTime<Utc>) -> DomainResult<Self> {
        let vendor_id = part
            .vendor_id
            .ok_or_else(|| DomainError::invalid_input(format!("part {} has no vendor", part.id)))?;
        let id = PurchaseOrderId::generate();
        let suffix = id.as_uuid().as_u128() as u32;
        let number = format!("AUTO-{}-{suffix:08x}", now.format("%Y%m%d"));
        let mut order = Self::draft(
            part.tenant_id,
            vendor_id,
            number,
            vec![NewLine {
                part_id: part.id,
                location_id: part.default_location_id,
                quantity,
                unit_cost: part.unit_cost.unwrap_or(0),
            }],
            now,
        )?;
        order.id = id;
        order.site_id = part.site_id;
        order.auto_generated = true;
        Ok(order)
    }

    pub fn transition(&mut self, to: PurchaseOrderStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn line(&self, line_no: u32) -> Option<&PurchaseOrderLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn is_fully_received(&self) -> bool {
        self.lines.iter().all(PurchaseOrderLine::is_fully_received)
    }

    /// Record a receipt against one line.
    ///
    /// Clamps to the ordered quantity. An approved order moves to `ordered` on
    /// its first receipt and to `received` once every line is complete.
    pub fn receive_line(
        &mut self,
        line_no: u32,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<LineReceipt> {
        if quantity <= 0 {
            return Err(DomainError::invalid_input("received quantity must be positive"));
        }
        if !self.status.accepts_receipts() {
            return Err(DomainError::invalid_transition(
                self.status,
                PurchaseOrderStatus::Received,
            ));
        }
        let idx = self
            .lines
            .iter()
            .position(|l| l.line_no == line_no)
            .ok_or_else(|| DomainError::not_found("purchase order line", line_no))?;
        if self.lines[idx].is_fully_received() {
            return Err(DomainError::invalid_input(format!(
                "line {line_no} of {} is already fully received",
                self.number
            )));
        }

        if self.status == PurchaseOrderStatus::Approved {
            self.transition(PurchaseOrderStatus::Ordered, now)?;
        }

        let line = &mut self.lines[idx];
        let before = line.quantity_received;
        line.quantity_received = line.quantity_ordered.min(before.saturating_add(quantity));
        let receipt = LineReceipt {
            line_no,
            part_id: line.part_id,
            accepted: line.quantity_received - before,
            quantity_received: line.quantity_received,
            unit_cost: line.unit_cost,
            location_id: line.location_id,
            order_status: self.status,
        };

        self.updated_at = now;
        if self.is_fully_received() {
            self.transition(PurchaseOrderStatus::Received, now)?;
        }
        Ok(LineReceipt {
            order_status: self.status,
            ..receipt
        })
    }

    /// Outstanding quantity per part, if this order counts as on-order demand.
    pub fn on_order(&self) -> impl Iterator<Item = (PartId, i64)> + '_ {
        let active = self.status.counts_as_on_order();
        self.lines
            .iter()
            .filter(move |_| active)
            .map(|l| (l.part_id, l.outstanding()))
            .filter(|(_, q)| *q > 0)
    }
}

/// Σ(ordered − received) per part over orders in an on-order status.
pub fn on_order_by_part<'a, I>(orders: I) -> HashMap<PartId, i64>
where
    I: IntoIterator<Item = &'a PurchaseOrder>,
{
    let mut demand = HashMap::new();
    for order in orders {
        for (part, qty) in order.on_order() {
            *demand.entry(part).or_insert(0) += qty;
        }
    }
    demand
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for PurchaseOrder {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
