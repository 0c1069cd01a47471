//! Minimal purchase-order service: what the receipt bridge and the suggestion
//! scan need to find in the store. Vendor management and approval policy live
//! elsewhere.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::DomainError;
use cmms_inventory::VendorId;
use cmms_purchasing::{NewLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

use crate::audit::{self, AuditEntry, AuditSink};
use crate::error::LedgerResult;
use crate::ledger::{require_location, require_part};
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct PurchaseOrderService {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
}

impl PurchaseOrderService {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    #[instrument(skip(self, ctx, lines), fields(tenant = %ctx.tenant_id, vendor = %vendor_id), err)]
    pub fn create_draft(
        &self,
        ctx: &RequestContext,
        vendor_id: VendorId,
        number: &str,
        lines: Vec<NewLine>,
    ) -> LedgerResult<PurchaseOrder> {
        authorize(ctx, Capability::ManagePurchaseOrders)?;
        let mut uow = self.store.begin()?;
        for line in &lines {
            require_part(uow.as_mut(), ctx.tenant_id, line.part_id)?;
            if let Some(loc) = line.location_id {
                require_location(uow.as_mut(), ctx.tenant_id, loc)?;
            }
        }
        let mut order = PurchaseOrder::draft(ctx.tenant_id, vendor_id, number, lines, Utc::now())?;
        order.site_id = ctx.site_id;
        uow.put_purchase_order(&order)?;
        uow.commit()?;

        info!(purchase_order = %order.id, number = %order.number, "purchase order drafted");
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(ctx.tenant_id, "purchase_order.created", "PurchaseOrder", order.id, ctx.user_id)
                .with_metadata(json!({
                    "number": order.number,
                    "vendorId": order.vendor_id,
                    "lines": order.lines.len(),
                })),
        );
        Ok(order)
    }

    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, purchase_order = %id, to = %to), err)]
    pub fn transition(
        &self,
        ctx: &RequestContext,
        id: PurchaseOrderId,
        to: PurchaseOrderStatus,
    ) -> LedgerResult<PurchaseOrder> {
        authorize(ctx, Capability::ManagePurchaseOrders)?;
        let mut uow = self.store.begin()?;
        let mut order = uow
            .lock_purchase_order(ctx.tenant_id, id)?
            .ok_or_else(|| DomainError::not_found("purchase order", id))?;
        let from = order.status;
        order.transition(to, Utc::now())?;
        uow.put_purchase_order(&order)?;
        uow.commit()?;

        info!(%from, "purchase order status changed");
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(ctx.tenant_id, "purchase_order.status_changed", "PurchaseOrder", order.id, ctx.user_id)
                .with_metadata(json!({ "from": from, "to": to })),
        );
        Ok(order)
    }

    pub fn get(&self, ctx: &RequestContext, id: PurchaseOrderId) -> LedgerResult<PurchaseOrder> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow
            .lock_purchase_order(ctx.tenant_id, id)?
            .ok_or_else(|| DomainError::not_found("purchase order", id))?)
    }

    /// Orders in any of `statuses`; every status when empty.
    pub fn list(
        &self,
        ctx: &RequestContext,
        statuses: &[PurchaseOrderStatus],
    ) -> LedgerResult<Vec<PurchaseOrder>> {
        authorize(ctx, Capability::ViewInventory)?;
        let statuses = if statuses.is_empty() {
            &PurchaseOrderStatus::ALL[..]
        } else {
            statuses
        };
        let mut uow = self.store.begin()?;
        Ok(uow.list_purchase_orders(ctx.tenant_id, statuses)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use cmms_auth::Role;
    use cmms_core::ErrorCategory;

    fn service(fx: &Fixture) -> PurchaseOrderService {
        PurchaseOrderService::new(fx.dyn_store(), fx.audit.clone())
    }

    fn line(part: cmms_inventory::PartId) -> NewLine {
        NewLine {
            part_id: part,
            location_id: None,
            quantity: 4,
            unit_cost: 120,
        }
    }

    #[test]
    fn draft_walks_the_status_graph() {
        let fx = Fixture::new();
        let part = fx.part("Impeller");
        let manager = fx.ctx_with(Role::Manager);
        let svc = service(&fx);

        let order = svc
            .create_draft(&manager, VendorId::generate(), "PO-7", vec![line(part)])
            .unwrap();
        assert_eq!(order.status, PurchaseOrderStatus::Draft);
        svc.transition(&manager, order.id, PurchaseOrderStatus::Pending).unwrap();
        let err = svc
            .transition(&manager, order.id, PurchaseOrderStatus::Received)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unprocessable);

        let on_order = svc.list(&manager, &PurchaseOrderStatus::ON_ORDER).unwrap();
        assert_eq!(on_order.len(), 1);
        assert_eq!(svc.get(&manager, order.id).unwrap().status, PurchaseOrderStatus::Pending);
        assert_eq!(
            fx.audit.actions(),
            vec!["purchase_order.created", "purchase_order.status_changed"]
        );
    }

    #[test]
    fn unknown_part_is_rejected_and_clerks_cannot_draft() {
        let fx = Fixture::new();
        let svc = service(&fx);
        let err = svc
            .create_draft(
                &fx.ctx_with(Role::Manager),
                VendorId::generate(),
                "PO-8",
                vec![line(cmms_inventory::PartId::generate())],
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);

        let part = fx.part("Rotor");
        let err = svc
            .create_draft(&fx.ctx_with(Role::Clerk), VendorId::generate(), "PO-9", vec![line(part)])
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }
}
