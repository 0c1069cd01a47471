//! Reorder scanning: periodic alert and suggestion jobs, their single-flight
//! guards and schedulers, and the review operations on their output.
//!
//! Both scans process tenants one by one, each in its own unit of work. A
//! failing tenant does not stop the others; the run reports the first error
//! after the sweep so the scheduler can back off. Rerunning is always safe:
//! alerts are upserted by key and suggestions are replaced by run id.

pub mod alerts;
pub mod guard;
pub mod review;
pub mod runner;
pub mod status;
pub mod suggestions;

pub use alerts::{AlertScanner, ALERT_SCAN_JOB};
pub use guard::{LeaseRunGuard, LocalRunGuard, RunGuard, RunPermit};
pub use review::ReorderReview;
pub use runner::{ScanRunner, ScanRunnerHandle, ScheduledJob};
pub use status::{ScanOutcome, ScanReport, ScanStatus};
pub use suggestions::{SuggestionScanner, SUGGESTION_SCAN_JOB};

use tracing::{info, warn};

use cmms_core::TenantId;
use cmms_inventory::RunId;

use crate::error::LedgerResult;
use crate::store::LedgerStore;
use status::StatusCell;

/// Writes made for one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TenantCounts {
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

pub(crate) fn run_guarded<F>(
    job: &'static str,
    guard: &dyn RunGuard,
    status: &StatusCell,
    store: &dyn LedgerStore,
    only: Option<TenantId>,
    mut scan_tenant: F,
) -> LedgerResult<ScanOutcome>
where
    F: FnMut(TenantId, RunId) -> LedgerResult<TenantCounts>,
{
    let Some(_permit) = guard.try_acquire(job) else {
        info!(job, "previous run still in flight; skipping");
        return Ok(ScanOutcome::Skipped);
    };

    let run_id = RunId::generate();
    status.started(run_id);
    let tenants = match only {
        Some(tenant) => Ok(vec![tenant]),
        None => store.tenants(),
    };
    let tenants = match tenants {
        Ok(t) => t,
        Err(e) => {
            let e = e.into();
            status.finished(None, Some(&e));
            return Err(e);
        }
    };

    let mut report = ScanReport::new(run_id);
    let mut first_error = None;
    for tenant in tenants {
        match scan_tenant(tenant, run_id) {
            Ok(counts) => {
                report.tenants_scanned += 1;
                report.created += counts.created;
                report.updated += counts.updated;
                report.removed += counts.removed;
            }
            Err(e) => {
                warn!(job, tenant = %tenant, run_id = %run_id, error = %e, "tenant scan failed");
                report.tenants_failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    info!(
        job,
        run_id = %run_id,
        tenants = report.tenants_scanned,
        failed = report.tenants_failed,
        created = report.created,
        updated = report.updated,
        removed = report.removed,
        "scan finished"
    );
    status.finished(Some(report), first_error.as_ref());
    match first_error {
        Some(e) => Err(e),
        None => Ok(ScanOutcome::Completed(report)),
    }
}
