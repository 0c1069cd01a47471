//! Audit trail sink.
//!
//! The generic audit-log writer lives outside this crate. Services hand it one
//! entry per committed mutation; a failing sink never fails the mutation.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use cmms_core::{TenantId, UserId};

/// Module name carried by every entry this crate writes.
pub const AUDIT_MODULE: &str = "inventory";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub tenant_id: TenantId,
    pub module: &'static str,
    pub action: String,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub actor_id: Option<UserId>,
    pub metadata: Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: TenantId,
        action: impl Into<String>,
        entity_type: &'static str,
        entity_id: impl ToString,
        actor_id: Option<UserId>,
    ) -> Self {
        Self {
            tenant_id,
            module: AUDIT_MODULE,
            action: action.into(),
            entity_type,
            entity_id: entity_id.to_string(),
            actor_id,
            metadata: Value::Null,
            at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn log_entry(&self, entry: AuditEntry) -> Result<(), String>;
}

/// Hand `entry` to `sink`; a refusal is logged, never returned.
pub(crate) fn record(sink: &dyn AuditSink, entry: AuditEntry) {
    let tenant = entry.tenant_id;
    let action = entry.action.clone();
    if let Err(e) = sink.log_entry(entry) {
        warn!(tenant = %tenant, action = %action, error = %e, "audit sink failed");
    }
}

/// Writes entries to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_entry(&self, entry: AuditEntry) -> Result<(), String> {
        info!(
            target: "audit",
            tenant = %entry.tenant_id,
            module = entry.module,
            action = %entry.action,
            entity_type = entry.entity_type,
            entity_id = %entry.entity_id,
            actor = ?entry.actor_id,
            metadata = %entry.metadata,
            "audit entry"
        );
        Ok(())
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    inner: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn log_entry(&self, entry: AuditEntry) -> Result<(), String> {
        self.inner
            .lock()
            .map_err(|_| "audit sink lock poisoned".to_string())?
            .push(entry);
        Ok(())
    }
}
