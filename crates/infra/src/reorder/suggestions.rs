use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use cmms_core::TenantId;
use cmms_inventory::{
    evaluate_suggestion, ReorderSuggestion, RunId, SuggestionCriteria, SuggestionSource,
    SuggestionSourceType,
};
use cmms_purchasing::{on_order_by_part, PurchaseOrderStatus};

use crate::error::LedgerResult;
use crate::store::LedgerStore;

use super::guard::RunGuard;
use super::status::{ScanOutcome, ScanStatus, StatusCell};
use super::{run_guarded, TenantCounts};

pub const SUGGESTION_SCAN_JOB: &str = "reorder.suggestion_scan";

/// Rebuilds each tenant's reorder suggestions from current stock and open
/// purchase orders. Whatever a run did not produce is deleted.
pub struct SuggestionScanner {
    store: Arc<dyn LedgerStore>,
    guard: Arc<dyn RunGuard>,
    criteria: SuggestionCriteria,
    status: StatusCell,
}

impl SuggestionScanner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        guard: Arc<dyn RunGuard>,
        criteria: SuggestionCriteria,
    ) -> Self {
        Self {
            store,
            guard,
            criteria,
            status: StatusCell::default(),
        }
    }

    pub fn criteria(&self) -> SuggestionCriteria {
        self.criteria
    }

    #[instrument(skip(self), err)]
    pub fn run(&self) -> LedgerResult<ScanOutcome> {
        self.run_for(None)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    pub fn run_tenant(&self, tenant_id: TenantId) -> LedgerResult<ScanOutcome> {
        self.run_for(Some(tenant_id))
    }

    pub fn status(&self) -> ScanStatus {
        self.status.snapshot()
    }

    fn run_for(&self, only: Option<TenantId>) -> LedgerResult<ScanOutcome> {
        run_guarded(
            SUGGESTION_SCAN_JOB,
            self.guard.as_ref(),
            &self.status,
            self.store.as_ref(),
            only,
            |tenant, run_id| self.scan_tenant(tenant, run_id),
        )
    }

    fn scan_tenant(&self, tenant_id: TenantId, run_id: RunId) -> LedgerResult<TenantCounts> {
        let now = Utc::now();
        let mut uow = self.store.begin()?;
        let parts = uow.list_parts(tenant_id)?;
        let orders = uow.list_purchase_orders(tenant_id, &PurchaseOrderStatus::ON_ORDER)?;
        let demand = on_order_by_part(&orders);

        let source = SuggestionSource {
            kind: SuggestionSourceType::ReorderScan,
            run_id,
            generated_at: now,
            criteria: self.criteria,
        };
        let mut counts = TenantCounts::default();
        for part in &parts {
            let on_order = demand.get(&part.id).copied().unwrap_or(0);
            let Some(figures) = evaluate_suggestion(part, on_order, &self.criteria) else {
                continue;
            };
            let suggestion =
                match uow.find_suggestion(tenant_id, part.id, SuggestionSourceType::ReorderScan)? {
                    Some(mut existing) => {
                        existing.supersede(part, figures, source.clone(), now);
                        counts.updated += 1;
                        existing
                    }
                    None => {
                        counts.created += 1;
                        ReorderSuggestion::new(part, figures, source.clone(), now)
                    }
                };
            uow.put_suggestion(&suggestion)?;
        }
        counts.removed = uow.delete_stale_suggestions(tenant_id, run_id)?;
        uow.commit()?;

        debug!(
            tenant = %tenant_id,
            run_id = %run_id,
            created = counts.created,
            updated = counts.updated,
            removed = counts.removed,
            "suggestions rebuilt"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::guard::LocalRunGuard;
    use crate::test_support::Fixture;
    use cmms_inventory::{ReorderSettings, SuggestionStatus, VendorId};
    use cmms_purchasing::{NewLine, PurchaseOrder};

    fn scanner(fx: &Fixture) -> SuggestionScanner {
        SuggestionScanner::new(
            fx.dyn_store(),
            Arc::new(LocalRunGuard::new()),
            SuggestionCriteria::default(),
        )
    }

    fn suggestions(fx: &Fixture) -> Vec<ReorderSuggestion> {
        let mut uow = fx.store.begin().unwrap();
        uow.list_suggestions(fx.tenant).unwrap()
    }

    fn tracked(reorder_point: i64, reorder_qty: i64) -> ReorderSettings {
        ReorderSettings {
            reorder_point,
            reorder_qty,
            ..ReorderSettings::default()
        }
    }

    #[test]
    fn rerun_replaces_rows_and_drops_covered_parts() {
        let fx = Fixture::new();
        let part = fx.part_with("Belt", tracked(5, 10));
        let bin = fx.location("A1");
        fx.seed(part, bin, 2);
        let scanner = scanner(&fx);

        scanner.run().unwrap();
        let first = suggestions(&fx);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].suggested_qty, 10);
        assert_eq!(first[0].on_hand, 2);

        scanner.run().unwrap();
        let second = suggestions(&fx);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[0].source.run_id, first[0].source.run_id);

        fx.seed(part, bin, 20);
        scanner.run().unwrap();
        assert!(suggestions(&fx).is_empty());
    }

    #[test]
    fn open_purchase_orders_reduce_or_suppress_suggestions() {
        let fx = Fixture::new();
        let part = fx.part_with("Seal", tracked(5, 0));
        let bin = fx.location("B2");
        fx.seed(part, bin, 3);

        let mut order = PurchaseOrder::draft(
            fx.tenant,
            VendorId::generate(),
            "PO-1",
            vec![NewLine {
                part_id: part,
                location_id: Some(bin),
                quantity: 2,
                unit_cost: 100,
            }],
            Utc::now(),
        )
        .unwrap();
        order
            .transition(PurchaseOrderStatus::Pending, Utc::now())
            .unwrap();
        {
            let mut uow = fx.store.begin().unwrap();
            uow.put_purchase_order(&order).unwrap();
            uow.commit().unwrap();
        }

        scanner(&fx).run().unwrap();
        assert!(suggestions(&fx).is_empty());
    }

    #[test]
    fn dismissed_suggestion_comes_back_on_the_next_run() {
        let fx = Fixture::new();
        let part = fx.part_with("Valve", tracked(4, 6));
        let bin = fx.location("C3");
        fx.seed(part, bin, 1);
        let scanner = scanner(&fx);
        scanner.run().unwrap();

        {
            let mut uow = fx.store.begin().unwrap();
            let mut s = uow.list_suggestions(fx.tenant).unwrap().remove(0);
            s.dismiss(Utc::now()).unwrap();
            uow.put_suggestion(&s).unwrap();
            uow.commit().unwrap();
        }
        scanner.run().unwrap();
        assert_eq!(suggestions(&fx)[0].status, SuggestionStatus::Open);
    }

    #[test]
    fn report_counts_new_superseded_and_removed() {
        let fx = Fixture::new();
        let part = fx.part_with("Chain", tracked(5, 5));
        let bin = fx.location("D4");
        fx.seed(part, bin, 1);
        let scanner = scanner(&fx);

        let ScanOutcome::Completed(first) = scanner.run().unwrap() else {
            panic!("expected a completed run");
        };
        assert_eq!((first.created, first.updated, first.removed), (1, 0, 0));

        fx.seed(part, bin, 50);
        let ScanOutcome::Completed(second) = scanner.run().unwrap() else {
            panic!("expected a completed run");
        };
        assert_eq!((second.created, second.updated, second.removed), (0, 0, 1));
    }
}
