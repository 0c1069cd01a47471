//! Notification sink for newly opened reorder alerts.
//!
//! Kept separate from the audit trail: notifications go to people, audit
//! entries go to the record.

use std::sync::Mutex;

use tracing::info;

use cmms_inventory::ReorderAlert;

pub trait NotificationSink: Send + Sync {
    /// Called once per alert, when the scan first opens it.
    fn alert_opened(&self, alert: &ReorderAlert) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn alert_opened(&self, alert: &ReorderAlert) -> Result<(), String> {
        info!(
            target: "notifications",
            tenant = %alert.tenant_id,
            part = %alert.part_id,
            location = ?alert.location_id,
            quantity = alert.quantity,
            threshold = alert.threshold,
            "reorder alert opened"
        );
        Ok(())
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    inner: Mutex<Vec<ReorderAlert>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ReorderAlert> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn alert_opened(&self, alert: &ReorderAlert) -> Result<(), String> {
        self.inner
            .lock()
            .map_err(|_| "notification sink lock poisoned".to_string())?
            .push(alert.clone());
        Ok(())
    }
}
