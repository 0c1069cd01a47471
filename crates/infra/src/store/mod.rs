//! Persistence boundary for the stock ledger.
//!
//! Every ledger mutation runs inside one [`UnitOfWork`]: reads, writes and the
//! idempotency-key insert either all commit or all vanish. Dropping a unit of
//! work without calling [`UnitOfWork::commit`] aborts it.
//!
//! The traits are synchronous. Backends that need async IO bridge internally
//! (see [`postgres`]).
//!
//! ## Tenant isolation
//!
//! Every read and write names the tenant. Implementations must never return a
//! record belonging to another tenant, and must reject writes whose record
//! tenant differs from the one named ([`StoreError::TenantIsolation`]).

pub mod in_memory;
pub mod postgres;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use cmms_core::TenantId;
use cmms_inventory::{
    AlertId, AlertStatus, IdempotencyKey, InventoryTransaction, Location, LocationId, Part,
    PartId, ReorderAlert, ReorderSuggestion, RunId, StockHistoryEntry, StockItem, StockItemId,
    StockKey, SuggestionId, SuggestionSourceType, ThresholdOverride,
};
use cmms_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique key was already taken (idempotency key, open alert, ...).
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// Runtime/lock/pool not usable right now.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for the transaction log, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    pub part_id: PartId,
    pub location_id: Option<LocationId>,
    pub limit: Option<usize>,
}

/// One atomic, tenant-scoped session against the store.
///
/// Reads of `Part`, `StockItem` and `PurchaseOrder` through the `lock_*`
/// methods take a write lock on the row until commit/abort.
pub trait UnitOfWork {
    // -- catalog --
    fn lock_part(&mut self, tenant_id: TenantId, id: PartId) -> StoreResult<Option<Part>>;
    fn put_part(&mut self, part: &Part) -> StoreResult<()>;
    fn list_parts(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Part>>;

    fn get_location(&mut self, tenant_id: TenantId, id: LocationId)
    -> StoreResult<Option<Location>>;
    fn put_location(&mut self, location: &Location) -> StoreResult<()>;
    fn list_locations(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Location>>;

    fn list_threshold_overrides(&mut self, tenant_id: TenantId)
    -> StoreResult<Vec<ThresholdOverride>>;
    fn put_threshold_override(&mut self, value: &ThresholdOverride) -> StoreResult<()>;
    fn delete_threshold_override(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        location_id: LocationId,
    ) -> StoreResult<bool>;

    // -- ledger cells --
    fn lock_stock_item(&mut self, tenant_id: TenantId, key: StockKey)
    -> StoreResult<Option<StockItem>>;
    fn put_stock_item(&mut self, item: &StockItem) -> StoreResult<()>;
    /// All cells of a tenant, or of one part when `part_id` is set.
    fn list_stock_items(
        &mut self,
        tenant_id: TenantId,
        part_id: Option<PartId>,
    ) -> StoreResult<Vec<StockItem>>;

    // -- transaction log --
    fn find_transaction(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<InventoryTransaction>>;
    /// Fails with [`StoreError::DuplicateKey`] when `(tenant, idempotency key)` exists.
    fn insert_transaction(&mut self, tx: &InventoryTransaction) -> StoreResult<()>;
    fn list_transactions(
        &mut self,
        tenant_id: TenantId,
        query: TransactionQuery,
    ) -> StoreResult<Vec<InventoryTransaction>>;

    fn insert_history(&mut self, entry: &StockHistoryEntry) -> StoreResult<()>;
    fn list_history(
        &mut self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> StoreResult<Vec<StockHistoryEntry>>;

    // -- reorder alerts --
    fn list_alerts(
        &mut self,
        tenant_id: TenantId,
        status: Option<AlertStatus>,
    ) -> StoreResult<Vec<ReorderAlert>>;
    fn get_alert(&mut self, tenant_id: TenantId, id: AlertId) -> StoreResult<Option<ReorderAlert>>;
    /// Upsert by id. Fails with [`StoreError::DuplicateKey`] if another active
    /// alert holds the same `(part, location)`.
    fn put_alert(&mut self, alert: &ReorderAlert) -> StoreResult<()>;

    // -- reorder suggestions --
    fn list_suggestions(&mut self, tenant_id: TenantId) -> StoreResult<Vec<ReorderSuggestion>>;
    fn get_suggestion(
        &mut self,
        tenant_id: TenantId,
        id: SuggestionId,
    ) -> StoreResult<Option<ReorderSuggestion>>;
    fn find_suggestion(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        source: SuggestionSourceType,
    ) -> StoreResult<Option<ReorderSuggestion>>;
    fn put_suggestion(&mut self, suggestion: &ReorderSuggestion) -> StoreResult<()>;
    /// Delete every suggestion of the tenant not produced by `run_id`.
    fn delete_stale_suggestions(&mut self, tenant_id: TenantId, run_id: RunId)
    -> StoreResult<u64>;

    // -- purchase orders --
    fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>>;
    fn put_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()>;
    fn list_purchase_orders(
        &mut self,
        tenant_id: TenantId,
        statuses: &[PurchaseOrderStatus],
    ) -> StoreResult<Vec<PurchaseOrder>>;

    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Store handle shared by the ledger services and the background jobs.
pub trait LedgerStore: Send + Sync {
    fn begin(&self) -> StoreResult<Box<dyn UnitOfWork + '_>>;

    /// Tenants that own at least one part.
    fn tenants(&self) -> StoreResult<Vec<TenantId>>;

    /// Take or renew the lease on `job` for `holder` until `now + ttl`.
    ///
    /// Succeeds when the lease is free, expired, or already held by `holder`.
    fn try_acquire_lease(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Release the lease if `holder` still owns it.
    fn release_lease(&self, job: &str, holder: &str) -> StoreResult<()>;
}

pub(crate) fn ensure_same_tenant(expected: TenantId, actual: TenantId, what: &str) -> StoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::TenantIsolation(format!(
            "{what} belongs to tenant {actual}, not {expected}"
        )))
    }
}
