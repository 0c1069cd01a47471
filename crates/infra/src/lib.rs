//! Infrastructure layer: persistence, the stock ledger services, background
//! scans and their schedulers, audit and notification sinks, configuration.

pub mod audit;
pub mod auto_reorder;
pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod purchasing;
pub mod receipt;
pub mod reconcile;
pub mod reorder;
pub mod store;

#[cfg(test)]
mod test_support;


pub use audit::{AuditEntry, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use auto_reorder::AutoReorder;
pub use catalog::{CatalogService, LocationDetails};
pub use config::{ConfigError, InventoryConfig, ScanGuardKind};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{Movement, StockLedger, StockLevels};
pub use notify::{InMemoryNotificationSink, NotificationSink, TracingNotificationSink};
pub use purchasing::PurchaseOrderService;
pub use receipt::{ReceiptBridge, ReceiptLine};
pub use reconcile::{QuantityDrift, ReconcileJob, ReconcileReport, RECONCILE_JOB};
pub use reorder::{
    AlertScanner, LeaseRunGuard, LocalRunGuard, ReorderReview, RunGuard, RunPermit, ScanOutcome,
    ScanReport, ScanRunner, ScanRunnerHandle, ScanStatus, ScheduledJob, SuggestionScanner,
};
pub use store::{
    InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, StoreResult, UnitOfWork,
};
