use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cmms_inventory::RunId;

use crate::error::LedgerError;

/// What one completed run did, summed over tenants.
///
/// For the alert scan `created`/`updated`/`removed` count opened, refreshed
/// and resolved alerts; for the suggestion scan, new, superseded and deleted
/// suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub run_id: RunId,
    pub tenants_scanned: usize,
    pub tenants_failed: usize,
    pub created: u64,
    pub updated: u64,
    pub removed: u64,
}

impl ScanReport {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            tenants_scanned: 0,
            tenants_failed: 0,
            created: 0,
            updated: 0,
            removed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed(ScanReport),
    /// Another run held the guard.
    Skipped,
}

/// Snapshot exposed by a scanner's `status()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub running: bool,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_run_id: Option<RunId>,
    pub last_outcome: Option<ScanReport>,
}

#[derive(Debug, Default)]
pub(crate) struct StatusCell {
    inner: Mutex<ScanStatus>,
}

impl StatusCell {
    pub fn snapshot(&self) -> ScanStatus {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn started(&self, run_id: RunId) {
        if let Ok(mut s) = self.inner.lock() {
            s.running = true;
            s.last_started_at = Some(Utc::now());
            s.last_run_id = Some(run_id);
        }
    }

    /// Record the end of a run. A run may report partial results and an error
    /// (some tenants failed).
    pub fn finished(&self, report: Option<ScanReport>, error: Option<&LedgerError>) {
        if let Ok(mut s) = self.inner.lock() {
            s.running = false;
            s.last_finished_at = Some(Utc::now());
            if report.is_some() {
                s.last_outcome = report;
            }
            s.last_error = error.map(ToString::to_string);
        }
    }
}
