//! PostgreSQL-backed ledger store.
//!
//! A [`UnitOfWork`] is one database transaction. Rows read through the `lock_*`
//! methods are taken `FOR UPDATE`, so concurrent mutations of the same stock
//! item serialize on the row while different items proceed independently.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateKey` | idempotency key, active alert, stock cell raced |
//! | Database (other) | any other | `Backend` | constraint or SQL failure |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` | pool or network trouble |
//! | Other | N/A | `Backend` | decode errors and the rest |
//!
//! ## Sync bridge
//!
//! The store traits are synchronous. Calls block on the runtime handle captured
//! at construction. From a runner thread this is a plain `block_on`; from inside
//! a multi-threaded tokio runtime the call moves off the worker first
//! (`block_in_place`). A current-thread runtime is not supported.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use uuid::Uuid;

use cmms_core::{SiteId, TenantId, UserId};
use cmms_inventory::{
    AlertId, AlertStatus, HistoryEntryId, IdempotencyKey, InventoryTransaction, Location,
    LocationId, Part, PartId, ReorderAlert, ReorderSuggestion, RunId, StockHistoryEntry,
    StockItem, StockItemId, StockKey, SuggestionCriteria, SuggestionId, SuggestionSource,
    SuggestionSourceType, ThresholdOverride, TransactionId, TransactionMetadata, VendorId,
};
use cmms_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus};

use super::{LedgerStore, StoreError, StoreResult, TransactionQuery, UnitOfWork};

const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

macro_rules! select_parts {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, site_id, name, sku, barcode, quantity, reorder_point, min_level, ",
            "reorder_qty, lead_time_days, auto_reorder, vendor_id, default_location_id, unit_cost, ",
            "last_auto_reorder_at, last_alert_at, created_at, updated_at FROM parts ",
            $tail
        )
    };
}

macro_rules! select_locations {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, site_id, parent_id, name, code, description, active, ",
            "created_at, updated_at FROM locations ",
            $tail
        )
    };
}

macro_rules! select_stock_items {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, part_id, location_id, site_id, quantity, unit_cost, ",
            "created_at, updated_at FROM stock_items ",
            $tail
        )
    };
}

macro_rules! select_transactions {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, type, part_id, quantity, delta, idempotency_key, location_id, ",
            "from_location_id, to_location_id, location_quantity_after, ",
            "from_location_quantity_after, to_location_quantity_after, part_quantity_after, ",
            "metadata, created_by, created_at FROM inventory_transactions ",
            $tail
        )
    };
}

macro_rules! select_alerts {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, part_id, location_id, status, quantity, threshold, ",
            "triggered_at, last_seen_at, resolved_at, updated_at FROM reorder_alerts ",
            $tail
        )
    };
}

macro_rules! select_suggestions {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, part_id, vendor_id, location_id, suggested_qty, on_hand, ",
            "on_order, threshold, status, source_type, source_run_id, source_generated_at, ",
            "source_criteria, created_at, updated_at FROM reorder_suggestions ",
            $tail
        )
    };
}

macro_rules! select_orders {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, site_id, vendor_id, number, status, auto_generated, ",
            "created_at, updated_at FROM purchase_orders ",
            $tail
        )
    };
}

/// PostgreSQL ledger store.
///
/// `Send + Sync`; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    /// Connect a pool and capture the current runtime for the sync bridge.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, Handle::current()))
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        debug!("stock ledger schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn block_on<F: Future>(runtime: &Handle, fut: F) -> F::Output {
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| runtime.block_on(fut)),
        Err(_) => runtime.block_on(fut),
    }
}

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    runtime: Handle,
}

impl UnitOfWork for PgUnitOfWork {
    fn lock_part(&mut self, tenant_id: TenantId, id: PartId) -> StoreResult<Option<Part>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_parts!("WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("lock_part", e))?;
        decode_opt("lock_part", row, part_from_row)
    }

    fn put_part(&mut self, part: &Part) -> StoreResult<()> {
        let lead_time = i32::try_from(part.lead_time_days)
            .map_err(|_| StoreError::Backend("lead time out of range".to_string()))?;
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO parts (
                    id, tenant_id, site_id, name, sku, barcode, quantity, reorder_point,
                    min_level, reorder_qty, lead_time_days, auto_reorder, vendor_id,
                    default_location_id, unit_cost, last_auto_reorder_at, last_alert_at,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
                ON CONFLICT (id) DO UPDATE SET
                    site_id = EXCLUDED.site_id,
                    name = EXCLUDED.name,
                    sku = EXCLUDED.sku,
                    barcode = EXCLUDED.barcode,
                    quantity = EXCLUDED.quantity,
                    reorder_point = EXCLUDED.reorder_point,
                    min_level = EXCLUDED.min_level,
                    reorder_qty = EXCLUDED.reorder_qty,
                    lead_time_days = EXCLUDED.lead_time_days,
                    auto_reorder = EXCLUDED.auto_reorder,
                    vendor_id = EXCLUDED.vendor_id,
                    default_location_id = EXCLUDED.default_location_id,
                    unit_cost = EXCLUDED.unit_cost,
                    last_auto_reorder_at = EXCLUDED.last_auto_reorder_at,
                    last_alert_at = EXCLUDED.last_alert_at,
                    updated_at = EXCLUDED.updated_at
                WHERE parts.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(part.id.as_uuid())
            .bind(part.tenant_id.as_uuid())
            .bind(part.site_id.map(Uuid::from))
            .bind(&part.name)
            .bind(&part.sku)
            .bind(&part.barcode)
            .bind(part.quantity)
            .bind(part.reorder_point)
            .bind(part.min_level)
            .bind(part.reorder_qty)
            .bind(lead_time)
            .bind(part.auto_reorder)
            .bind(part.vendor_id.map(Uuid::from))
            .bind(part.default_location_id.map(Uuid::from))
            .bind(part.unit_cost)
            .bind(part.last_auto_reorder_at)
            .bind(part.last_alert_at)
            .bind(part.created_at)
            .bind(part.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_part", e))?;
        ensure_written(result.rows_affected(), "part")
    }

    fn list_parts(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Part>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_parts!("WHERE tenant_id = $1 ORDER BY id"))
                .bind(tenant_id.as_uuid())
                .fetch_all(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("list_parts", e))?;
        decode_all("list_parts", rows, part_from_row)
    }

    fn get_location(
        &mut self,
        tenant_id: TenantId,
        id: LocationId,
    ) -> StoreResult<Option<Location>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_locations!("WHERE tenant_id = $1 AND id = $2"))
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("get_location", e))?;
        decode_opt("get_location", row, location_from_row)
    }

    fn put_location(&mut self, location: &Location) -> StoreResult<()> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO locations (
                    id, tenant_id, site_id, parent_id, name, code, description, active,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    site_id = EXCLUDED.site_id,
                    parent_id = EXCLUDED.parent_id,
                    name = EXCLUDED.name,
                    code = EXCLUDED.code,
                    description = EXCLUDED.description,
                    active = EXCLUDED.active,
                    updated_at = EXCLUDED.updated_at
                WHERE locations.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(location.id.as_uuid())
            .bind(location.tenant_id.as_uuid())
            .bind(location.site_id.map(Uuid::from))
            .bind(location.parent_id.map(Uuid::from))
            .bind(&location.name)
            .bind(&location.code)
            .bind(&location.description)
            .bind(location.active)
            .bind(location.created_at)
            .bind(location.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_location", e))?;
        ensure_written(result.rows_affected(), "location")
    }

    fn list_locations(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Location>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_locations!("WHERE tenant_id = $1 ORDER BY id"))
                .bind(tenant_id.as_uuid())
                .fetch_all(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("list_locations", e))?;
        decode_all("list_locations", rows, location_from_row)
    }

    fn list_threshold_overrides(
        &mut self,
        tenant_id: TenantId,
    ) -> StoreResult<Vec<ThresholdOverride>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(
                "SELECT tenant_id, part_id, location_id, threshold, updated_at \
                 FROM threshold_overrides WHERE tenant_id = $1",
            )
            .bind(tenant_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_threshold_overrides", e))?;
        decode_all("list_threshold_overrides", rows, |row| {
            Ok(ThresholdOverride {
                tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
                part_id: PartId::from_uuid(row.try_get("part_id")?),
                location_id: LocationId::from_uuid(row.try_get("location_id")?),
                threshold: row.try_get("threshold")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
    }

    fn put_threshold_override(&mut self, value: &ThresholdOverride) -> StoreResult<()> {
        let tx = &mut self.tx;
        block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO threshold_overrides (tenant_id, part_id, location_id, threshold, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tenant_id, part_id, location_id) DO UPDATE SET
                    threshold = EXCLUDED.threshold,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(value.tenant_id.as_uuid())
            .bind(value.part_id.as_uuid())
            .bind(value.location_id.as_uuid())
            .bind(value.threshold)
            .bind(value.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_threshold_override", e))?;
        Ok(())
    }

    fn delete_threshold_override(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        location_id: LocationId,
    ) -> StoreResult<bool> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                "DELETE FROM threshold_overrides \
                 WHERE tenant_id = $1 AND part_id = $2 AND location_id = $3",
            )
            .bind(tenant_id.as_uuid())
            .bind(part_id.as_uuid())
            .bind(location_id.as_uuid())
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("delete_threshold_override", e))?;
        Ok(result.rows_affected() > 0)
    }

    fn lock_stock_item(
        &mut self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> StoreResult<Option<StockItem>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_stock_items!(
                "WHERE tenant_id = $1 AND part_id = $2 AND location_id = $3 FOR UPDATE"
            ))
            .bind(tenant_id.as_uuid())
            .bind(key.part_id.as_uuid())
            .bind(key.location_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("lock_stock_item", e))?;
        decode_opt("lock_stock_item", row, stock_item_from_row)
    }

    fn put_stock_item(&mut self, item: &StockItem) -> StoreResult<()> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO stock_items (
                    id, tenant_id, part_id, location_id, site_id, quantity, unit_cost,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    quantity = EXCLUDED.quantity,
                    unit_cost = EXCLUDED.unit_cost,
                    updated_at = EXCLUDED.updated_at
                WHERE stock_items.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.tenant_id.as_uuid())
            .bind(item.part_id.as_uuid())
            .bind(item.location_id.as_uuid())
            .bind(item.site_id.map(Uuid::from))
            .bind(item.quantity)
            .bind(item.unit_cost)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_stock_item", e))?;
        ensure_written(result.rows_affected(), "stock item")
    }

    fn list_stock_items(
        &mut self,
        tenant_id: TenantId,
        part_id: Option<PartId>,
    ) -> StoreResult<Vec<StockItem>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_stock_items!(
                "WHERE tenant_id = $1 AND ($2::uuid IS NULL OR part_id = $2) ORDER BY part_id, location_id"
            ))
            .bind(tenant_id.as_uuid())
            .bind(part_id.map(Uuid::from))
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_stock_items", e))?;
        decode_all("list_stock_items", rows, stock_item_from_row)
    }

    fn find_transaction(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<InventoryTransaction>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_transactions!("WHERE tenant_id = $1 AND idempotency_key = $2"))
                .bind(tenant_id.as_uuid())
                .bind(key.as_str())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("find_transaction", e))?;
        decode_opt("find_transaction", row, transaction_from_row)
    }

    fn insert_transaction(&mut self, t: &InventoryTransaction) -> StoreResult<()> {
        let tx = &mut self.tx;
        block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO inventory_transactions (
                    id, tenant_id, type, part_id, quantity, delta, idempotency_key,
                    location_id, from_location_id, to_location_id, location_quantity_after,
                    from_location_quantity_after, to_location_quantity_after,
                    part_quantity_after, metadata, created_by, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(t.id.as_uuid())
            .bind(t.tenant_id.as_uuid())
            .bind(t.kind.as_str())
            .bind(t.part_id.as_uuid())
            .bind(t.quantity)
            .bind(t.delta)
            .bind(t.idempotency_key.as_str())
            .bind(t.location_id.map(Uuid::from))
            .bind(t.from_location_id.map(Uuid::from))
            .bind(t.to_location_id.map(Uuid::from))
            .bind(t.location_quantity_after)
            .bind(t.from_location_quantity_after)
            .bind(t.to_location_quantity_after)
            .bind(t.part_quantity_after)
            .bind(Json(&t.metadata))
            .bind(t.created_by.map(Uuid::from))
            .bind(t.created_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("insert_transaction", e))?;
        Ok(())
    }

    fn list_transactions(
        &mut self,
        tenant_id: TenantId,
        query: TransactionQuery,
    ) -> StoreResult<Vec<InventoryTransaction>> {
        let limit = query.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_transactions!(
                "WHERE tenant_id = $1 AND part_id = $2 AND ($3::uuid IS NULL \
                 OR location_id = $3 OR from_location_id = $3 OR to_location_id = $3) \
                 ORDER BY created_at DESC, id DESC LIMIT $4"
            ))
            .bind(tenant_id.as_uuid())
            .bind(query.part_id.as_uuid())
            .bind(query.location_id.map(Uuid::from))
            .bind(limit)
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_transactions", e))?;
        decode_all("list_transactions", rows, transaction_from_row)
    }

    fn insert_history(&mut self, entry: &StockHistoryEntry) -> StoreResult<()> {
        let tx = &mut self.tx;
        block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO stock_history (
                    id, tenant_id, stock_item_id, part_id, location_id, transaction_id,
                    delta, quantity_after, note, created_by, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.tenant_id.as_uuid())
            .bind(entry.stock_item_id.as_uuid())
            .bind(entry.part_id.as_uuid())
            .bind(entry.location_id.as_uuid())
            .bind(entry.transaction_id.as_uuid())
            .bind(entry.delta)
            .bind(entry.quantity_after)
            .bind(&entry.note)
            .bind(entry.created_by.map(Uuid::from))
            .bind(entry.created_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("insert_history", e))?;
        Ok(())
    }

    fn list_history(
        &mut self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> StoreResult<Vec<StockHistoryEntry>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(
                "SELECT id, tenant_id, stock_item_id, part_id, location_id, transaction_id, \
                 delta, quantity_after, note, created_by, created_at FROM stock_history \
                 WHERE tenant_id = $1 AND stock_item_id = $2 ORDER BY created_at, id",
            )
            .bind(tenant_id.as_uuid())
            .bind(stock_item_id.as_uuid())
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_history", e))?;
        decode_all("list_history", rows, |row| {
            Ok(StockHistoryEntry {
                id: HistoryEntryId::from_uuid(row.try_get("id")?),
                tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
                stock_item_id: StockItemId::from_uuid(row.try_get("stock_item_id")?),
                part_id: PartId::from_uuid(row.try_get("part_id")?),
                location_id: LocationId::from_uuid(row.try_get("location_id")?),
                transaction_id: TransactionId::from_uuid(row.try_get("transaction_id")?),
                delta: row.try_get("delta")?,
                quantity_after: row.try_get("quantity_after")?,
                note: row.try_get("note")?,
                created_by: opt_id(row, "created_by")?.map(UserId::from_uuid),
                created_at: row.try_get("created_at")?,
            })
        })
    }

    fn list_alerts(
        &mut self,
        tenant_id: TenantId,
        status: Option<AlertStatus>,
    ) -> StoreResult<Vec<ReorderAlert>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_alerts!(
                "WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) ORDER BY triggered_at, id"
            ))
            .bind(tenant_id.as_uuid())
            .bind(status.map(AlertStatus::as_str))
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_alerts", e))?;
        decode_all("list_alerts", rows, alert_from_row)
    }

    fn get_alert(&mut self, tenant_id: TenantId, id: AlertId) -> StoreResult<Option<ReorderAlert>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_alerts!("WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("get_alert", e))?;
        decode_opt("get_alert", row, alert_from_row)
    }

    fn put_alert(&mut self, alert: &ReorderAlert) -> StoreResult<()> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO reorder_alerts (
                    id, tenant_id, part_id, location_id, status, quantity, threshold,
                    triggered_at, last_seen_at, resolved_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    quantity = EXCLUDED.quantity,
                    threshold = EXCLUDED.threshold,
                    last_seen_at = EXCLUDED.last_seen_at,
                    resolved_at = EXCLUDED.resolved_at,
                    updated_at = EXCLUDED.updated_at
                WHERE reorder_alerts.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(alert.id.as_uuid())
            .bind(alert.tenant_id.as_uuid())
            .bind(alert.part_id.as_uuid())
            .bind(alert.location_id.map(Uuid::from))
            .bind(alert.status.as_str())
            .bind(alert.quantity)
            .bind(alert.threshold)
            .bind(alert.triggered_at)
            .bind(alert.last_seen_at)
            .bind(alert.resolved_at)
            .bind(alert.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_alert", e))?;
        ensure_written(result.rows_affected(), "alert")
    }

    fn list_suggestions(&mut self, tenant_id: TenantId) -> StoreResult<Vec<ReorderSuggestion>> {
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_suggestions!("WHERE tenant_id = $1 ORDER BY part_id, id"))
                .bind(tenant_id.as_uuid())
                .fetch_all(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("list_suggestions", e))?;
        decode_all("list_suggestions", rows, suggestion_from_row)
    }

    fn get_suggestion(
        &mut self,
        tenant_id: TenantId,
        id: SuggestionId,
    ) -> StoreResult<Option<ReorderSuggestion>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_suggestions!("WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("get_suggestion", e))?;
        decode_opt("get_suggestion", row, suggestion_from_row)
    }

    fn find_suggestion(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        source: SuggestionSourceType,
    ) -> StoreResult<Option<ReorderSuggestion>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_suggestions!(
                "WHERE tenant_id = $1 AND part_id = $2 AND source_type = $3 FOR UPDATE"
            ))
            .bind(tenant_id.as_uuid())
            .bind(part_id.as_uuid())
            .bind(source.as_str())
            .fetch_optional(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("find_suggestion", e))?;
        decode_opt("find_suggestion", row, suggestion_from_row)
    }

    fn put_suggestion(&mut self, s: &ReorderSuggestion) -> StoreResult<()> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                r#"
                INSERT INTO reorder_suggestions (
                    id, tenant_id, part_id, vendor_id, location_id, suggested_qty, on_hand,
                    on_order, threshold, status, source_type, source_run_id,
                    source_generated_at, source_criteria, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (id) DO UPDATE SET
                    vendor_id = EXCLUDED.vendor_id,
                    location_id = EXCLUDED.location_id,
                    suggested_qty = EXCLUDED.suggested_qty,
                    on_hand = EXCLUDED.on_hand,
                    on_order = EXCLUDED.on_order,
                    threshold = EXCLUDED.threshold,
                    status = EXCLUDED.status,
                    source_run_id = EXCLUDED.source_run_id,
                    source_generated_at = EXCLUDED.source_generated_at,
                    source_criteria = EXCLUDED.source_criteria,
                    updated_at = EXCLUDED.updated_at
                WHERE reorder_suggestions.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(s.id.as_uuid())
            .bind(s.tenant_id.as_uuid())
            .bind(s.part_id.as_uuid())
            .bind(s.vendor_id.map(Uuid::from))
            .bind(s.location_id.map(Uuid::from))
            .bind(s.suggested_qty)
            .bind(s.on_hand)
            .bind(s.on_order)
            .bind(s.threshold)
            .bind(s.status.as_str())
            .bind(s.source.kind.as_str())
            .bind(s.source.run_id.as_uuid())
            .bind(s.source.generated_at)
            .bind(Json(&s.source.criteria))
            .bind(s.created_at)
            .bind(s.updated_at)
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("put_suggestion", e))?;
        ensure_written(result.rows_affected(), "suggestion")
    }

    fn delete_stale_suggestions(
        &mut self,
        tenant_id: TenantId,
        run_id: RunId,
    ) -> StoreResult<u64> {
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            sqlx::query(
                "DELETE FROM reorder_suggestions WHERE tenant_id = $1 AND source_run_id <> $2",
            )
            .bind(tenant_id.as_uuid())
            .bind(run_id.as_uuid())
            .execute(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("delete_stale_suggestions", e))?;
        Ok(result.rows_affected())
    }

    fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        let tx = &mut self.tx;
        let row = block_on(&self.runtime, async move {
            sqlx::query(select_orders!("WHERE tenant_id = $1 AND id = $2 FOR UPDATE"))
                .bind(tenant_id.as_uuid())
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
        })
        .map_err(|e| map_sqlx_error("lock_purchase_order", e))?;
        let Some(order) = decode_opt("lock_purchase_order", row, order_from_row)? else {
            return Ok(None);
        };
        let mut orders = self.attach_lines(vec![order])?;
        Ok(orders.pop())
    }

    fn put_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()> {
        let lines: Vec<(i32, &PurchaseOrderLine)> = order
            .lines
            .iter()
            .map(|l| {
                i32::try_from(l.line_no)
                    .map(|no| (no, l))
                    .map_err(|_| StoreError::Backend("line number out of range".to_string()))
            })
            .collect::<StoreResult<_>>()?;
        let tx = &mut self.tx;
        let result = block_on(&self.runtime, async move {
            let header = sqlx::query(
                r#"
                INSERT INTO purchase_orders (
                    id, tenant_id, site_id, vendor_id, number, status, auto_generated,
                    created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    number = EXCLUDED.number,
                    updated_at = EXCLUDED.updated_at
                WHERE purchase_orders.tenant_id = EXCLUDED.tenant_id
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(order.tenant_id.as_uuid())
            .bind(order.site_id.map(Uuid::from))
            .bind(order.vendor_id.as_uuid())
            .bind(&order.number)
            .bind(order.status.as_str())
            .bind(order.auto_generated)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&mut **tx)
            .await?;
            if header.rows_affected() == 0 {
                return Ok(header);
            }

            sqlx::query("DELETE FROM purchase_order_lines WHERE purchase_order_id = $1")
                .bind(order.id.as_uuid())
                .execute(&mut **tx)
                .await?;
            for (line_no, line) in lines {
                sqlx::query(
                    r#"
                    INSERT INTO purchase_order_lines (
                        purchase_order_id, line_no, part_id, location_id, quantity_ordered,
                        quantity_received, unit_cost
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(order.id.as_uuid())
                .bind(line_no)
                .bind(line.part_id.as_uuid())
                .bind(line.location_id.map(Uuid::from))
                .bind(line.quantity_ordered)
                .bind(line.quantity_received)
                .bind(line.unit_cost)
                .execute(&mut **tx)
                .await?;
            }
            Ok(header)
        })
        .map_err(|e| map_sqlx_error("put_purchase_order", e))?;
        ensure_written(result.rows_affected(), "purchase order")
    }

    fn list_purchase_orders(
        &mut self,
        tenant_id: TenantId,
        statuses: &[PurchaseOrderStatus],
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let statuses: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(select_orders!(
                "WHERE tenant_id = $1 AND status = ANY($2) ORDER BY created_at, id"
            ))
            .bind(tenant_id.as_uuid())
            .bind(&statuses)
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("list_purchase_orders", e))?;
        let orders = decode_all("list_purchase_orders", rows, order_from_row)?;
        self.attach_lines(orders)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgUnitOfWork { tx, runtime } = *self;
        block_on(&runtime, tx.commit()).map_err(|e| map_sqlx_error("commit", e))
    }
}

impl PgUnitOfWork {
    fn attach_lines(&mut self, mut orders: Vec<PurchaseOrder>) -> StoreResult<Vec<PurchaseOrder>> {
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| Uuid::from(o.id)).collect();
        let tx = &mut self.tx;
        let rows = block_on(&self.runtime, async move {
            sqlx::query(
                "SELECT purchase_order_id, line_no, part_id, location_id, quantity_ordered, \
                 quantity_received, unit_cost FROM purchase_order_lines \
                 WHERE purchase_order_id = ANY($1) ORDER BY purchase_order_id, line_no",
            )
            .bind(&ids)
            .fetch_all(&mut **tx)
            .await
        })
        .map_err(|e| map_sqlx_error("load_purchase_order_lines", e))?;

        for row in rows {
            let decoded = (|| -> Result<(Uuid, PurchaseOrderLine), sqlx::Error> {
                let line_no: i32 = row.try_get("line_no")?;
                Ok((
                    row.try_get("purchase_order_id")?,
                    PurchaseOrderLine {
                        line_no: u32::try_from(line_no).map_err(decode_error)?,
                        part_id: PartId::from_uuid(row.try_get("part_id")?),
                        location_id: opt_id(&row, "location_id")?.map(LocationId::from_uuid),
                        quantity_ordered: row.try_get("quantity_ordered")?,
                        quantity_received: row.try_get("quantity_received")?,
                        unit_cost: row.try_get("unit_cost")?,
                    },
                ))
            })()
            .map_err(|e| map_sqlx_error("load_purchase_order_lines", e))?;
            if let Some(order) = orders.iter_mut().find(|o| Uuid::from(o.id) == decoded.0) {
                order.lines.push(decoded.1);
            }
        }
        Ok(orders)
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn begin(&self) -> StoreResult<Box<dyn UnitOfWork + '_>> {
        let tx = block_on(&self.runtime, self.pool.begin())
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            runtime: self.runtime.clone(),
        }))
    }

    fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let rows = block_on(&self.runtime, async {
            sqlx::query("SELECT DISTINCT tenant_id FROM parts ORDER BY tenant_id")
                .fetch_all(&self.pool)
                .await
        })
        .map_err(|e| map_sqlx_error("tenants", e))?;
        decode_all("tenants", rows, |row| {
            Ok(TenantId::from_uuid(row.try_get("tenant_id")?))
        })
    }

    #[instrument(skip(self), err)]
    fn try_acquire_lease(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = block_on(&self.runtime, async {
            sqlx::query(
                r#"
                INSERT INTO scan_leases (job, holder, expires_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (job) DO UPDATE SET
                    holder = EXCLUDED.holder,
                    expires_at = EXCLUDED.expires_at
                WHERE scan_leases.holder = EXCLUDED.holder OR scan_leases.expires_at <= $4
                "#,
            )
            .bind(job)
            .bind(holder)
            .bind(now + ttl)
            .bind(now)
            .execute(&self.pool)
            .await
        })
        .map_err(|e| map_sqlx_error("try_acquire_lease", e))?;
        Ok(result.rows_affected() == 1)
    }

    fn release_lease(&self, job: &str, holder: &str) -> StoreResult<()> {
        block_on(&self.runtime, async {
            sqlx::query("DELETE FROM scan_leases WHERE job = $1 AND holder = $2")
                .bind(job)
                .bind(holder)
                .execute(&self.pool)
                .await
        })
        .map_err(|e| map_sqlx_error("release_lease", e))?;
        Ok(())
    }
}

/// Map SQLx errors by PostgreSQL error code.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::DuplicateKey(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Upserts guarded by `WHERE <table>.tenant_id = EXCLUDED.tenant_id` touch no
/// row when the id belongs to another tenant.
fn ensure_written(rows_affected: u64, what: &str) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::TenantIsolation(format!(
            "{what} id is owned by another tenant"
        )));
    }
    Ok(())
}

fn decode_error<E>(err: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(err))
}

fn decode_opt<T>(
    operation: &str,
    row: Option<PgRow>,
    decode: impl Fn(&PgRow) -> Result<T, sqlx::Error>,
) -> StoreResult<Option<T>> {
    row.as_ref()
        .map(decode)
        .transpose()
        .map_err(|e| map_sqlx_error(operation, e))
}

fn decode_all<T>(
    operation: &str,
    rows: Vec<PgRow>,
    decode: impl Fn(&PgRow) -> Result<T, sqlx::Error>,
) -> StoreResult<Vec<T>> {
    rows.iter()
        .map(decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error(operation, e))
}

fn opt_id(row: &PgRow, column: &str) -> Result<Option<Uuid>, sqlx::Error> {
    row.try_get::<Option<Uuid>, _>(column)
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: core::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(decode_error)
}

fn part_from_row(row: &PgRow) -> Result<Part, sqlx::Error> {
    let lead_time: i32 = row.try_get("lead_time_days")?;
    Ok(Part {
        id: PartId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        site_id: opt_id(row, "site_id")?.map(SiteId::from_uuid),
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        barcode: row.try_get("barcode")?,
        quantity: row.try_get("quantity")?,
        reorder_point: row.try_get("reorder_point")?,
        min_level: row.try_get("min_level")?,
        reorder_qty: row.try_get("reorder_qty")?,
        lead_time_days: u32::try_from(lead_time).map_err(decode_error)?,
        auto_reorder: row.try_get("auto_reorder")?,
        vendor_id: opt_id(row, "vendor_id")?.map(VendorId::from_uuid),
        default_location_id: opt_id(row, "default_location_id")?.map(LocationId::from_uuid),
        unit_cost: row.try_get("unit_cost")?,
        last_auto_reorder_at: row.try_get("last_auto_reorder_at")?,
        last_alert_at: row.try_get("last_alert_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn location_from_row(row: &PgRow) -> Result<Location, sqlx::Error> {
    Ok(Location {
        id: LocationId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        site_id: opt_id(row, "site_id")?.map(SiteId::from_uuid),
        parent_id: opt_id(row, "parent_id")?.map(LocationId::from_uuid),
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn stock_item_from_row(row: &PgRow) -> Result<StockItem, sqlx::Error> {
    Ok(StockItem {
        id: StockItemId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        part_id: PartId::from_uuid(row.try_get("part_id")?),
        location_id: LocationId::from_uuid(row.try_get("location_id")?),
        site_id: opt_id(row, "site_id")?.map(SiteId::from_uuid),
        quantity: row.try_get("quantity")?,
        unit_cost: row.try_get("unit_cost")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<InventoryTransaction, sqlx::Error> {
    let key: String = row.try_get("idempotency_key")?;
    let metadata: Json<TransactionMetadata> = row.try_get("metadata")?;
    Ok(InventoryTransaction {
        id: TransactionId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        kind: parse_column(row, "type")?,
        part_id: PartId::from_uuid(row.try_get("part_id")?),
        quantity: row.try_get("quantity")?,
        delta: row.try_get("delta")?,
        idempotency_key: IdempotencyKey::parse(key).map_err(decode_error)?,
        location_id: opt_id(row, "location_id")?.map(LocationId::from_uuid),
        from_location_id: opt_id(row, "from_location_id")?.map(LocationId::from_uuid),
        to_location_id: opt_id(row, "to_location_id")?.map(LocationId::from_uuid),
        location_quantity_after: row.try_get("location_quantity_after")?,
        from_location_quantity_after: row.try_get("from_location_quantity_after")?,
        to_location_quantity_after: row.try_get("to_location_quantity_after")?,
        part_quantity_after: row.try_get("part_quantity_after")?,
        metadata: metadata.0,
        created_by: opt_id(row, "created_by")?.map(UserId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<ReorderAlert, sqlx::Error> {
    Ok(ReorderAlert {
        id: AlertId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        part_id: PartId::from_uuid(row.try_get("part_id")?),
        location_id: opt_id(row, "location_id")?.map(LocationId::from_uuid),
        status: parse_column(row, "status")?,
        quantity: row.try_get("quantity")?,
        threshold: row.try_get("threshold")?,
        triggered_at: row.try_get("triggered_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        resolved_at: row.try_get("resolved_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn suggestion_from_row(row: &PgRow) -> Result<ReorderSuggestion, sqlx::Error> {
    let criteria: Json<SuggestionCriteria> = row.try_get("source_criteria")?;
    Ok(ReorderSuggestion {
        id: SuggestionId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        part_id: PartId::from_uuid(row.try_get("part_id")?),
        vendor_id: opt_id(row, "vendor_id")?.map(VendorId::from_uuid),
        location_id: opt_id(row, "location_id")?.map(LocationId::from_uuid),
        suggested_qty: row.try_get("suggested_qty")?,
        on_hand: row.try_get("on_hand")?,
        on_order: row.try_get("on_order")?,
        threshold: row.try_get("threshold")?,
        status: parse_column(row, "status")?,
        source: SuggestionSource {
            kind: parse_column(row, "source_type")?,
            run_id: RunId::from_uuid(row.try_get("source_run_id")?),
            generated_at: row.try_get("source_generated_at")?,
            criteria: criteria.0,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<PurchaseOrder, sqlx::Error> {
    Ok(PurchaseOrder {
        id: PurchaseOrderId::from_uuid(row.try_get("id")?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        site_id: opt_id(row, "site_id")?.map(SiteId::from_uuid),
        vendor_id: VendorId::from_uuid(row.try_get("vendor_id")?),
        number: row.try_get("number")?,
        status: parse_column(row, "status")?,
        lines: Vec::new(),
        auto_generated: row.try_get("auto_generated")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
