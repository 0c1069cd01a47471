//! Draft purchase orders for parts that drop to their reorder threshold.
//!
//! Runs after a ledger mutation has committed, in its own unit of work. The
//! caller of the mutation never sees a failure from here.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};

use cmms_core::{TenantId, UserId};
use cmms_inventory::PartId;
use cmms_purchasing::PurchaseOrder;

use crate::audit::{self, AuditEntry, AuditSink};
use crate::error::LedgerResult;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct AutoReorder {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    cooldown: Duration,
}

impl AutoReorder {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>, cooldown: Duration) -> Self {
        Self {
            store,
            audit,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Create a draft order for `part_id` if it is due. Returns the order created.
    ///
    /// The due check is repeated under the part lock so two concurrent
    /// mutations cannot both order inside one cooldown window.
    pub fn run(
        &self,
        tenant_id: TenantId,
        part_id: PartId,
        actor: Option<UserId>,
    ) -> LedgerResult<Option<PurchaseOrder>> {
        let now = Utc::now();
        let mut uow = self.store.begin()?;
        let Some(mut part) = uow.lock_part(tenant_id, part_id)? else {
            return Ok(None);
        };
        if !part.auto_reorder_due(now, self.cooldown) {
            return Ok(None);
        }

        let order = PurchaseOrder::auto_reorder_draft(&part, part.reorder_quantity(), now)?;
        uow.put_purchase_order(&order)?;
        part.mark_auto_reordered(now);
        uow.put_part(&part)?;
        uow.commit()?;

        info!(
            tenant = %tenant_id,
            part = %part_id,
            order = %order.number,
            quantity = order.lines.first().map(|l| l.quantity_ordered),
            "auto-reorder draft created"
        );
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(tenant_id, "purchase_order.auto_created", "PurchaseOrder", order.id, actor)
                .with_metadata(json!({
                    "partId": part_id,
                    "number": order.number,
                    "vendorId": order.vendor_id,
                })),
        );
        Ok(Some(order))
    }

    /// Best-effort wrapper used by the mutation path.
    pub fn run_suppressed(&self, tenant_id: TenantId, part_id: PartId, actor: Option<UserId>) {
        if let Err(e) = self.run(tenant_id, part_id, actor) {
            warn!(tenant = %tenant_id, part = %part_id, error = %e, "auto-reorder failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use cmms_inventory::{ReorderSettings, VendorId};
    use cmms_purchasing::PurchaseOrderStatus;

    fn auto_reorder(fx: &Fixture) -> AutoReorder {
        AutoReorder::new(fx.dyn_store(), fx.audit.clone(), Duration::hours(24))
    }

    fn low_part(fx: &Fixture, vendor: Option<VendorId>) -> PartId {
        let part = fx.part_with(
            "Filter",
            ReorderSettings {
                reorder_point: 4,
                auto_reorder: true,
                vendor_id: vendor,
                ..ReorderSettings::default()
            },
        );
        fx.edit_part(part, |p| p.quantity = 1);
        part
    }

    #[test]
    fn drafts_gap_to_reorder_point_and_respects_cooldown() {
        let fx = Fixture::new();
        let part = low_part(&fx, Some(VendorId::generate()));
        let job = auto_reorder(&fx);

        let order = job.run(fx.tenant, part, None).unwrap().unwrap();
        assert!(order.auto_generated);
        assert_eq!(order.status, PurchaseOrderStatus::Draft);
        assert_eq!(order.lines[0].quantity_ordered, 3);
        assert!(order.number.starts_with("AUTO-"));

        assert_eq!(job.run(fx.tenant, part, None).unwrap(), None);

        fx.edit_part(part, |p| p.last_auto_reorder_at = Some(Utc::now() - Duration::hours(25)));
        assert!(job.run(fx.tenant, part, None).unwrap().is_some());
    }

    #[test]
    fn part_without_vendor_is_never_ordered() {
        let fx = Fixture::new();
        let part = low_part(&fx, None);
        assert_eq!(auto_reorder(&fx).run(fx.tenant, part, None).unwrap(), None);
        assert!(fx.audit.actions().is_empty());
    }

    #[test]
    fn unknown_part_is_a_no_op() {
        let fx = Fixture::new();
        let job = auto_reorder(&fx);
        assert_eq!(job.run(fx.tenant, PartId::generate(), None).unwrap(), None);
        job.run_suppressed(fx.tenant, PartId::generate(), None);
    }
}
