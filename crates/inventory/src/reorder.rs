//! Reorder alerts: standing "this cell is under-stocked" records.
//!
//! The scan itself lives in infra; this module holds the alert lifecycle and the
//! pure planning step that turns one tenant's observations into upserts and
//! resolutions.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, TenantId, TenantScoped};

use crate::location::LocationId;
use crate::part::{Part, PartId};

entity_id!(
    /// Reorder alert identifier.
    AlertId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Approved,
    Skipped,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Approved => "approved",
            AlertStatus::Skipped => "skipped",
            AlertStatus::Resolved => "resolved",
        }
    }

    /// Active alerts block a second alert for the same key.
    pub fn is_active(self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

impl core::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AlertStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(AlertStatus::Open),
            "approved" => Ok(AlertStatus::Approved),
            "skipped" => Ok(AlertStatus::Skipped),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(DomainError::invalid_input(format!("unknown alert status '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertKey {
    pub part_id: PartId,
    pub location_id: Option<LocationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderAlert {
    pub id: AlertId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: Option<LocationId>,
    pub status: AlertStatus,
    pub quantity: i64,
    pub threshold: i64,
    pub triggered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ReorderAlert {
    pub fn open(tenant_id: TenantId, observation: &AlertObservation, now: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::generate(),
            tenant_id,
            part_id: observation.key.part_id,
            location_id: observation.key.location_id,
            status: AlertStatus::Open,
            quantity: observation.quantity,
            threshold: observation.threshold,
            triggered_at: now,
            last_seen_at: now,
            resolved_at: None,
            updated_at: now,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            part_id: self.part_id,
            location_id: self.location_id,
        }
    }

    /// Condition still holds: keep the status, update what was seen.
    pub fn refresh(&mut self, quantity: i64, threshold: i64, now: DateTime<Utc>) {
        self.quantity = quantity;
        self.threshold = threshold;
        self.last_seen_at = now;
        self.updated_at = now;
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }

    /// Manual workflow step. Only `open` alerts can be approved or skipped.
    pub fn transition(&mut self, to: AlertStatus, now: DateTime<Utc>) -> DomainResult<()> {
        let allowed = matches!(
            (self.status, to),
            (AlertStatus::Open, AlertStatus::Approved) | (AlertStatus::Open, AlertStatus::Skipped)
        );
        if !allowed {
            return Err(DomainError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for ReorderAlert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for ReorderAlert {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Per-location replacement for the part's reorder threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdOverride {
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub location_id: LocationId,
    pub threshold: i64,
    pub updated_at: DateTime<Utc>,
}

pub fn effective_threshold(part: &Part, override_threshold: Option<i64>) -> i64 {
    override_threshold.unwrap_or_else(|| part.reorder_threshold())
}

/// Whether a cell at `quantity` is under-stocked against `threshold`.
///
/// A zero threshold means "not tracked".
pub fn is_triggered(quantity: i64, threshold: i64) -> bool {
    threshold > 0 && quantity <= threshold
}

/// One stock item as seen by an alert scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertObservation {
    pub key: AlertKey,
    pub quantity: i64,
    pub threshold: i64,
}

/// Writes an alert scan must make for one tenant.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AlertScanPlan {
    pub opened: Vec<ReorderAlert>,
    pub refreshed: Vec<ReorderAlert>,
    pub resolved: Vec<ReorderAlert>,
}

/// Plan a scan: open alerts for newly triggered keys, refresh active ones that
/// still trigger, resolve active ones that no longer do.
///
/// `active` must hold the tenant's active alerts; at most one per key survives
/// (extra duplicates, if a store ever produced them, are resolved).
pub fn plan_alert_scan(
    tenant_id: TenantId,
    active: Vec<ReorderAlert>,
    observations: &[AlertObservation],
    now: DateTime<Utc>,
) -> AlertScanPlan {
    let mut plan = AlertScanPlan::default();
    let mut by_key: HashMap<AlertKey, ReorderAlert> = HashMap::new();
    for alert in active.into_iter().filter(|a| a.status.is_active()) {
        match by_key.get(&alert.key()) {
            Some(kept) if kept.triggered_at <= alert.triggered_at => {
                let mut dup = alert;
                dup.resolve(now);
                plan.resolved.push(dup);
            }
            _ => {
                if let Some(mut replaced) = by_key.insert(alert.key(), alert) {
                    replaced.resolve(now);
                    plan.resolved.push(replaced);
                }
            }
        }
    }

    let mut triggered: HashSet<AlertKey> = HashSet::new();
    for obs in observations {
        if !is_triggered(obs.quantity, obs.threshold) || !triggered.insert(obs.key) {
            continue;
        }
        match by_key.remove(&obs.key) {
            Some(mut alert) => {
                alert.refresh(obs.quantity, obs.threshold, now);
                plan.refreshed.push(alert);
            }
            None => plan.opened.push(ReorderAlert::open(tenant_id, obs, now)),
        }
    }

    for (_, mut stale) in by_key {
        stale.resolve(now);
        plan.resolved.push(stale);
    }
    plan
}
