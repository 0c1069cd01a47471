//! Inventory domain: parts, locations, ledger cells, transactions and reorder state.
//!
//! Pure, deterministic domain logic (no IO, no storage). The infra crate owns
//! persistence and the transactional orchestration around these types.

pub mod location;
pub mod part;
pub mod reorder;
pub mod stock;
pub mod suggestion;
pub mod transaction;

pub use location::{ensure_acyclic, Location, LocationId, NewLocation, MAX_LOCATION_DEPTH};
pub use part::{NewPart, Part, PartId, ReorderSettings, VendorId};
pub use reorder::{
    effective_threshold, is_triggered, plan_alert_scan, AlertId, AlertKey, AlertObservation,
    AlertScanPlan, AlertStatus, ReorderAlert, ThresholdOverride,
};
pub use stock::{ensure_positive, StockChange, StockItem, StockItemId, StockKey};
pub use suggestion::{
    buffered_threshold, evaluate_suggestion, ReorderSuggestion, RunId, SuggestionCriteria,
    SuggestionFigures, SuggestionId, SuggestionSource, SuggestionSourceType, SuggestionStatus,
};
pub use transaction::{
    replay_quantities, HistoryEntryId, IdempotencyKey, InventoryTransaction, QuantityPoint,
    StockHistoryEntry, TransactionId, TransactionMetadata, TransactionType,
    MAX_IDEMPOTENCY_KEY_LEN,
};
