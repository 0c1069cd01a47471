use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use cmms_core::TenantId;
use cmms_inventory::{
    effective_threshold, plan_alert_scan, AlertKey, AlertObservation, LocationId, PartId,
};

use crate::error::LedgerResult;
use crate::notify::NotificationSink;
use crate::store::{LedgerStore, UnitOfWork};

use super::guard::RunGuard;
use super::status::{ScanOutcome, ScanStatus, StatusCell};
use super::{run_guarded, TenantCounts};

pub const ALERT_SCAN_JOB: &str = "reorder.alert_scan";

/// Opens, refreshes and resolves reorder alerts for every tenant.
pub struct AlertScanner {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
    guard: Arc<dyn RunGuard>,
    status: StatusCell,
}

impl AlertScanner {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationSink>,
        guard: Arc<dyn RunGuard>,
    ) -> Self {
        Self {
            store,
            notifier,
            guard,
            status: StatusCell::default(),
        }
    }

    /// Scan every tenant. Returns `Skipped` if a run is already in flight.
    #[instrument(skip(self), err)]
    pub fn run(&self) -> LedgerResult<ScanOutcome> {
        self.run_for(None)
    }

    /// Scan one tenant only, under the same guard.
    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    pub fn run_tenant(&self, tenant_id: TenantId) -> LedgerResult<ScanOutcome> {
        self.run_for(Some(tenant_id))
    }

    pub fn status(&self) -> ScanStatus {
        self.status.snapshot()
    }

    fn run_for(&self, only: Option<TenantId>) -> LedgerResult<ScanOutcome> {
        run_guarded(
            ALERT_SCAN_JOB,
            self.guard.as_ref(),
            &self.status,
            self.store.as_ref(),
            only,
            |tenant, _run_id| self.scan_tenant(tenant),
        )
    }

    fn scan_tenant(&self, tenant_id: TenantId) -> LedgerResult<TenantCounts> {
        let now = Utc::now();
        let mut uow = self.store.begin()?;
        let observations = observe(uow.as_mut(), tenant_id)?;
        let active: Vec<_> = uow
            .list_alerts(tenant_id, None)?
            .into_iter()
            .filter(|a| a.status.is_active())
            .collect();
        let plan = plan_alert_scan(tenant_id, active, &observations, now);

        // Resolve first so a key freed this run can be reopened.
        for alert in &plan.resolved {
            uow.put_alert(alert)?;
        }
        for alert in &plan.refreshed {
            uow.put_alert(alert)?;
        }
        for alert in &plan.opened {
            uow.put_alert(alert)?;
        }
        uow.commit()?;

        debug!(
            tenant = %tenant_id,
            opened = plan.opened.len(),
            refreshed = plan.refreshed.len(),
            resolved = plan.resolved.len(),
            "alert scan planned"
        );
        for alert in &plan.opened {
            if let Err(e) = self.notifier.alert_opened(alert) {
                warn!(tenant = %tenant_id, alert = %alert.id, error = %e, "alert notification failed");
            }
        }

        Ok(TenantCounts {
            created: plan.opened.len() as u64,
            updated: plan.refreshed.len() as u64,
            removed: plan.resolved.len() as u64,
        })
    }
}

/// One observation per stock item, plus a part-level one for tracked parts
/// that have no stock item anywhere yet.
fn observe(uow: &mut dyn UnitOfWork, tenant_id: TenantId) -> LedgerResult<Vec<AlertObservation>> {
    let parts: HashMap<PartId, _> = uow
        .list_parts(tenant_id)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    let overrides: HashMap<(PartId, LocationId), i64> = uow
        .list_threshold_overrides(tenant_id)?
        .into_iter()
        .map(|o| ((o.part_id, o.location_id), o.threshold))
        .collect();

    let mut stocked = HashSet::new();
    let mut observations = Vec::new();
    for item in uow.list_stock_items(tenant_id, None)? {
        let Some(part) = parts.get(&item.part_id) else {
            continue;
        };
        stocked.insert(item.part_id);
        let threshold = effective_threshold(
            part,
            overrides.get(&(item.part_id, item.location_id)).copied(),
        );
        observations.push(AlertObservation {
            key: AlertKey {
                part_id: item.part_id,
                location_id: Some(item.location_id),
            },
            quantity: item.quantity,
            threshold,
        });
    }

    for part in parts.values().filter(|p| !stocked.contains(&p.id)) {
        observations.push(AlertObservation {
            key: AlertKey {
                part_id: part.id,
                location_id: None,
            },
            quantity: part.quantity,
            threshold: effective_threshold(part, None),
        });
    }
    Ok(observations)
}
