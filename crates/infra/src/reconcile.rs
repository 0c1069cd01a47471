//! Mirror check: `Part::quantity` against the sum of its stock items.
//!
//! The ledger keeps the two equal inside every unit of work, so drift means a
//! write went around it. The job reports drift and, when asked, rewrites the
//! part's mirror from the stock items, which are authoritative.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::TenantId;
use cmms_inventory::PartId;

use crate::audit::{self, AuditEntry, AuditSink};
use crate::error::LedgerResult;
use crate::reorder::{RunGuard, ScheduledJob};
use crate::store::LedgerStore;

pub const RECONCILE_JOB: &str = "inventory.reconcile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityDrift {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub recorded: i64,
    pub actual: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub tenants_checked: usize,
    pub parts_checked: usize,
    pub drifts: Vec<QuantityDrift>,
    pub repaired: usize,
}

pub struct ReconcileJob {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    guard: Arc<dyn RunGuard>,
    /// Whether scheduled runs repair.
    repair: bool,
}

impl ReconcileJob {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditSink>,
        guard: Arc<dyn RunGuard>,
        repair: bool,
    ) -> Self {
        Self {
            store,
            audit,
            guard,
            repair,
        }
    }

    /// On-demand run for the caller's tenant.
    pub fn reconcile_for(
        &self,
        ctx: &RequestContext,
        repair: bool,
    ) -> LedgerResult<Option<ReconcileReport>> {
        authorize(ctx, Capability::RunReconciliation)?;
        self.reconcile(Some(ctx.tenant_id), repair)
    }

    /// Check one tenant, or all of them. `None` when another run holds the guard.
    #[instrument(skip(self), err)]
    pub fn reconcile(
        &self,
        tenant: Option<TenantId>,
        repair: bool,
    ) -> LedgerResult<Option<ReconcileReport>> {
        let Some(_permit) = self.guard.try_acquire(RECONCILE_JOB) else {
            info!("reconciliation already running; skipping");
            return Ok(None);
        };
        let tenants = match tenant {
            Some(t) => vec![t],
            None => self.store.tenants()?,
        };

        let mut report = ReconcileReport::default();
        for tenant_id in tenants {
            self.reconcile_tenant(tenant_id, repair, &mut report)?;
            report.tenants_checked += 1;
        }

        if report.drifts.is_empty() {
            info!(tenants = report.tenants_checked, parts = report.parts_checked, "quantities reconciled");
        } else {
            warn!(
                tenants = report.tenants_checked,
                parts = report.parts_checked,
                drifts = report.drifts.len(),
                repaired = report.repaired,
                "quantity drift found"
            );
        }
        Ok(Some(report))
    }

    fn reconcile_tenant(
        &self,
        tenant_id: TenantId,
        repair: bool,
        report: &mut ReconcileReport,
    ) -> LedgerResult<()> {
        let now = Utc::now();
        let mut uow = self.store.begin()?;
        let mut sums: HashMap<PartId, i64> = HashMap::new();
        for item in uow.list_stock_items(tenant_id, None)? {
            let sum = sums.entry(item.part_id).or_insert(0);
            *sum = sum.saturating_add(item.quantity);
        }

        let mut found = Vec::new();
        for part in uow.list_parts(tenant_id)? {
            report.parts_checked += 1;
            let actual = sums.get(&part.id).copied().unwrap_or(0);
            if actual == part.quantity {
                continue;
            }
            warn!(tenant = %tenant_id, part = %part.id, recorded = part.quantity, actual, "part quantity drifted");
            found.push(QuantityDrift {
                tenant_id,
                part_id: part.id,
                recorded: part.quantity,
                actual,
            });
        }

        if repair && !found.is_empty() {
            for drift in &found {
                if let Some(mut part) = uow.lock_part(tenant_id, drift.part_id)? {
                    part.set_quantity(drift.actual, now);
                    uow.put_part(&part)?;
                }
            }
            uow.commit()?;
            for drift in &found {
                audit::record(
                    self.audit.as_ref(),
                    AuditEntry::new(tenant_id, "part.quantity_reconciled", "Part", drift.part_id, None)
                        .with_metadata(json!({
                            "recorded": drift.recorded,
                            "actual": drift.actual,
                        })),
                );
            }
            report.repaired += found.len();
        }
        report.drifts.extend(found);
        Ok(())
    }
}

impl ScheduledJob for ReconcileJob {
    fn name(&self) -> &'static str {
        RECONCILE_JOB
    }

    fn run_scheduled(&self) -> LedgerResult<()> {
        self.reconcile(None, self.repair).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorder::LocalRunGuard;
    use crate::test_support::Fixture;
    use cmms_auth::Role;
    use cmms_core::ErrorCategory;

    fn job(fx: &Fixture) -> ReconcileJob {
        ReconcileJob::new(fx.dyn_store(), fx.audit.clone(), Arc::new(LocalRunGuard::new()), false)
    }

    #[test]
    fn clean_ledger_has_no_drift() {
        let fx = Fixture::new();
        let part = fx.part("Bolt");
        fx.seed(part, fx.location("A"), 7);
        fx.seed(part, fx.location("B"), 3);

        let report = job(&fx).reconcile(None, false).unwrap().unwrap();
        assert_eq!(report.tenants_checked, 1);
        assert_eq!(report.parts_checked, 1);
        assert!(report.drifts.is_empty());
    }

    #[test]
    fn drift_is_reported_then_repaired() {
        let fx = Fixture::new();
        let part = fx.part("Nut");
        fx.seed(part, fx.location("A"), 5);
        fx.edit_part(part, |p| p.quantity = 9);
        let job = job(&fx);

        let report = job.reconcile(Some(fx.tenant), false).unwrap().unwrap();
        assert_eq!(
            report.drifts,
            vec![QuantityDrift {
                tenant_id: fx.tenant,
                part_id: part,
                recorded: 9,
                actual: 5,
            }]
        );
        assert_eq!(fx.part_quantity(part), 9);

        let repaired = job.reconcile_for(&fx.ctx_with(Role::Admin), true).unwrap().unwrap();
        assert_eq!(repaired.repaired, 1);
        assert_eq!(fx.part_quantity(part), 5);
        assert!(fx.audit.actions().contains(&"part.quantity_reconciled".to_string()));
    }

    #[test]
    fn on_demand_run_needs_admin() {
        let fx = Fixture::new();
        let err = job(&fx)
            .reconcile_for(&fx.ctx_with(Role::Manager), false)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }

    #[test]
    fn held_guard_skips() {
        let fx = Fixture::new();
        let guard = Arc::new(LocalRunGuard::new());
        let job = ReconcileJob::new(fx.dyn_store(), fx.audit.clone(), guard.clone(), false);
        let _held = guard.try_acquire(RECONCILE_JOB).unwrap();
        assert_eq!(job.reconcile(None, false).unwrap(), None);
    }
}
