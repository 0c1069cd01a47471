use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use cmms_core::TenantId;
use cmms_inventory::{
    AlertId, AlertStatus, IdempotencyKey, InventoryTransaction, Location, LocationId, Part,
    PartId, ReorderAlert, ReorderSuggestion, RunId, StockHistoryEntry, StockItem, StockItemId,
    StockKey, SuggestionId, SuggestionSourceType, ThresholdOverride,
};
use cmms_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

use super::{
    ensure_same_tenant, LedgerStore, StoreError, StoreResult, TransactionQuery, UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    parts: HashMap<PartId, Part>,
    locations: HashMap<LocationId, Location>,
    overrides: HashMap<(TenantId, PartId, LocationId), ThresholdOverride>,
    stock: HashMap<(TenantId, StockKey), StockItem>,
    transactions: Vec<InventoryTransaction>,
    transaction_keys: HashMap<(TenantId, IdempotencyKey), usize>,
    history: Vec<StockHistoryEntry>,
    alerts: HashMap<AlertId, ReorderAlert>,
    suggestions: HashMap<SuggestionId, ReorderSuggestion>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrder>,
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. Units of work are serialized by one mutex and run
/// against a private copy of the state that replaces the shared state on
/// commit, so an aborted unit leaves nothing behind. Not optimized for large
/// data sets.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

/// Insert into an id-keyed map, refusing to move a record between tenants.
fn put_scoped<K, V>(
    map: &mut HashMap<K, V>,
    key: K,
    value: &V,
    tenant_of: impl Fn(&V) -> TenantId,
    what: &str,
) -> StoreResult<()>
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    if let Some(existing) = map.get(&key) {
        ensure_same_tenant(tenant_of(existing), tenant_of(value), what)?;
    }
    map.insert(key, value.clone());
    Ok(())
}

fn get_scoped<K, V>(
    map: &HashMap<K, V>,
    key: &K,
    tenant_id: TenantId,
    tenant_of: impl Fn(&V) -> TenantId,
) -> Option<V>
where
    K: std::hash::Hash + Eq,
    V: Clone,
{
    map.get(key).filter(|v| tenant_of(v) == tenant_id).cloned()
}

struct InMemoryUnitOfWork<'a> {
    shared: MutexGuard<'a, LedgerState>,
    working: LedgerState,
}

impl UnitOfWork for InMemoryUnitOfWork<'_> {
    fn lock_part(&mut self, tenant_id: TenantId, id: PartId) -> StoreResult<Option<Part>> {
        Ok(get_scoped(&self.working.parts, &id, tenant_id, |p| p.tenant_id))
    }

    fn put_part(&mut self, part: &Part) -> StoreResult<()> {
        put_scoped(&mut self.working.parts, part.id, part, |p| p.tenant_id, "part")
    }

    fn list_parts(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Part>> {
        let mut parts: Vec<Part> = self
            .working
            .parts
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        parts.sort_by_key(|p| p.id);
        Ok(parts)
    }

    fn get_location(
        &mut self,
        tenant_id: TenantId,
        id: LocationId,
    ) -> StoreResult<Option<Location>> {
        Ok(get_scoped(&self.working.locations, &id, tenant_id, |l| l.tenant_id))
    }

    fn put_location(&mut self, location: &Location) -> StoreResult<()> {
        put_scoped(
            &mut self.working.locations,
            location.id,
            location,
            |l| l.tenant_id,
            "location",
        )
    }

    fn list_locations(&mut self, tenant_id: TenantId) -> StoreResult<Vec<Location>> {
        let mut locations: Vec<Location> = self
            .working
            .locations
            .values()
            .filter(|l| l.tenant_id == tenant_id)
            .cloned()
            .collect();
        locations.sort_by_key(|l| l.id);
        Ok(locations)
    }

    fn list_threshold_overrides(
        &mut self,
        tenant_id: TenantId,
    ) -> StoreResult<Vec<ThresholdOverride>> {
        Ok(self
            .working
            .overrides
            .values()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn put_threshold_override(&mut self, value: &ThresholdOverride) -> StoreResult<()> {
        self.working.overrides.insert(
            (value.tenant_id, value.part_id, value.location_id),
            value.clone(),
        );
        Ok(())
    }

    fn delete_threshold_override(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        location_id: LocationId,
    ) -> StoreResult<bool> {
        Ok(self
            .working
            .overrides
            .remove(&(tenant_id, part_id, location_id))
            .is_some())
    }

    fn lock_stock_item(
        &mut self,
        tenant_id: TenantId,
        key: StockKey,
    ) -> StoreResult<Option<StockItem>> {
        Ok(self.working.stock.get(&(tenant_id, key)).cloned())
    }

    fn put_stock_item(&mut self, item: &StockItem) -> StoreResult<()> {
        let slot = (item.tenant_id, item.key());
        if let Some(existing) = self.working.stock.get(&slot) {
            if existing.id != item.id {
                return Err(StoreError::DuplicateKey(format!(
                    "stock item for part {} at location {}",
                    item.part_id, item.location_id
                )));
            }
        }
        self.working.stock.insert(slot, item.clone());
        Ok(())
    }

    fn list_stock_items(
        &mut self,
        tenant_id: TenantId,
        part_id: Option<PartId>,
    ) -> StoreResult<Vec<StockItem>> {
        let mut items: Vec<StockItem> = self
            .working
            .stock
            .iter()
            .filter(|((t, key), _)| *t == tenant_id && part_id.is_none_or(|p| key.part_id == p))
            .map(|(_, item)| item.clone())
            .collect();
        items.sort_by_key(|i| i.key());
        Ok(items)
    }

    fn find_transaction(
        &mut self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
    ) -> StoreResult<Option<InventoryTransaction>> {
        Ok(self
            .working
            .transaction_keys
            .get(&(tenant_id, key.clone()))
            .and_then(|idx| self.working.transactions.get(*idx))
            .cloned())
    }

    fn insert_transaction(&mut self, tx: &InventoryTransaction) -> StoreResult<()> {
        let slot = (tx.tenant_id, tx.idempotency_key.clone());
        if self.working.transaction_keys.contains_key(&slot) {
            return Err(StoreError::DuplicateKey(format!(
                "idempotency key '{}' already used",
                tx.idempotency_key
            )));
        }
        self.working
            .transaction_keys
            .insert(slot, self.working.transactions.len());
        self.working.transactions.push(tx.clone());
        Ok(())
    }

    fn list_transactions(
        &mut self,
        tenant_id: TenantId,
        query: TransactionQuery,
    ) -> StoreResult<Vec<InventoryTransaction>> {
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(self
            .working
            .transactions
            .iter()
            .rev()
            .filter(|t| t.tenant_id == tenant_id && t.part_id == query.part_id)
            .filter(|t| query.location_id.is_none_or(|l| t.touches(l)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert_history(&mut self, entry: &StockHistoryEntry) -> StoreResult<()> {
        self.working.history.push(entry.clone());
        Ok(())
    }

    fn list_history(
        &mut self,
        tenant_id: TenantId,
        stock_item_id: StockItemId,
    ) -> StoreResult<Vec<StockHistoryEntry>> {
        Ok(self
            .working
            .history
            .iter()
            .filter(|h| h.tenant_id == tenant_id && h.stock_item_id == stock_item_id)
            .cloned()
            .collect())
    }

    fn list_alerts(
        &mut self,
        tenant_id: TenantId,
        status: Option<AlertStatus>,
    ) -> StoreResult<Vec<ReorderAlert>> {
        let mut alerts: Vec<ReorderAlert> = self
            .working
            .alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id && status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| (a.triggered_at, a.id));
        Ok(alerts)
    }

    fn get_alert(&mut self, tenant_id: TenantId, id: AlertId) -> StoreResult<Option<ReorderAlert>> {
        Ok(get_scoped(&self.working.alerts, &id, tenant_id, |a| a.tenant_id))
    }

    fn put_alert(&mut self, alert: &ReorderAlert) -> StoreResult<()> {
        if alert.status.is_active() {
            let clash = self.working.alerts.values().any(|a| {
                a.id != alert.id
                    && a.tenant_id == alert.tenant_id
                    && a.status.is_active()
                    && a.key() == alert.key()
            });
            if clash {
                return Err(StoreError::DuplicateKey(format!(
                    "active alert already exists for part {}",
                    alert.part_id
                )));
            }
        }
        put_scoped(&mut self.working.alerts, alert.id, alert, |a| a.tenant_id, "alert")
    }

    fn list_suggestions(&mut self, tenant_id: TenantId) -> StoreResult<Vec<ReorderSuggestion>> {
        let mut suggestions: Vec<ReorderSuggestion> = self
            .working
            .suggestions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        suggestions.sort_by_key(|s| (s.part_id, s.id));
        Ok(suggestions)
    }

    fn get_suggestion(
        &mut self,
        tenant_id: TenantId,
        id: SuggestionId,
    ) -> StoreResult<Option<ReorderSuggestion>> {
        Ok(get_scoped(&self.working.suggestions, &id, tenant_id, |s| s.tenant_id))
    }

    fn find_suggestion(
        &mut self,
        tenant_id: TenantId,
        part_id: PartId,
        source: SuggestionSourceType,
    ) -> StoreResult<Option<ReorderSuggestion>> {
        Ok(self
            .working
            .suggestions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.part_id == part_id && s.source.kind == source)
            .cloned())
    }

    fn put_suggestion(&mut self, suggestion: &ReorderSuggestion) -> StoreResult<()> {
        put_scoped(
            &mut self.working.suggestions,
            suggestion.id,
            suggestion,
            |s| s.tenant_id,
            "suggestion",
        )
    }

    fn delete_stale_suggestions(
        &mut self,
        tenant_id: TenantId,
        run_id: RunId,
    ) -> StoreResult<u64> {
        let before = self.working.suggestions.len();
        self.working
            .suggestions
            .retain(|_, s| s.tenant_id != tenant_id || s.is_from_run(run_id));
        Ok((before - self.working.suggestions.len()) as u64)
    }

    fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> StoreResult<Option<PurchaseOrder>> {
        Ok(get_scoped(&self.working.purchase_orders, &id, tenant_id, |o| o.tenant_id))
    }

    fn put_purchase_order(&mut self, order: &PurchaseOrder) -> StoreResult<()> {
        put_scoped(
            &mut self.working.purchase_orders,
            order.id,
            order,
            |o| o.tenant_id,
            "purchase order",
        )
    }

    fn list_purchase_orders(
        &mut self,
        tenant_id: TenantId,
        statuses: &[PurchaseOrderStatus],
    ) -> StoreResult<Vec<PurchaseOrder>> {
        let mut orders: Vec<PurchaseOrder> = self
            .working
            .purchase_orders
            .values()
            .filter(|o| o.tenant_id == tenant_id && statuses.contains(&o.status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        Ok(orders)
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryUnitOfWork { mut shared, working } = *self;
        *shared = working;
        Ok(())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn begin(&self) -> StoreResult<Box<dyn UnitOfWork + '_>> {
        let shared = self.state.lock().map_err(poisoned)?;
        let working = shared.clone();
        Ok(Box::new(InMemoryUnitOfWork { shared, working }))
    }

    fn tenants(&self) -> StoreResult<Vec<TenantId>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut tenants: Vec<TenantId> = state.parts.values().map(|p| p.tenant_id).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    fn try_acquire_lease(
        &self,
        job: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut leases = self.leases.lock().map_err(poisoned)?;
        match leases.get(job) {
            Some(lease) if lease.holder != holder && lease.expires_at > now => Ok(false),
            _ => {
                leases.insert(
                    job.to_string(),
                    Lease {
                        holder: holder.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    fn release_lease(&self, job: &str, holder: &str) -> StoreResult<()> {
        let mut leases = self.leases.lock().map_err(poisoned)?;
        if leases.get(job).is_some_and(|l| l.holder == holder) {
            leases.remove(job);
        }
        Ok(())
    }
}
