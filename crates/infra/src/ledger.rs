//! Stock ledger: the mutation surface for on-hand quantity.
//!
//! ## Mutation protocol
//!
//! ```text
//! authorize(ctx, capability)
//!   ↓
//! begin unit of work
//!   ↓
//! find (tenant, idempotency key) ── found ──▶ return the recorded transaction
//!   ↓
//! lock part + stock item(s), plan the change (pure domain checks)
//!   ↓
//! write stock item(s), part mirror, transaction, history rows
//!   ↓
//! commit ── duplicate key ──▶ re-read and return the winner's transaction
//!   ↓
//! audit entry, auto-reorder (after commit, failures suppressed)
//! ```
//!
//! Every step before commit runs inside one [`UnitOfWork`]; any error drops it
//! and nothing is written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::{DomainError, TenantId};
use cmms_inventory::{
    ensure_positive, replay_quantities, HistoryEntryId, IdempotencyKey, InventoryTransaction,
    Location, LocationId, Part, PartId, QuantityPoint, StockChange, StockHistoryEntry, StockItem,
    StockKey, TransactionId, TransactionMetadata, TransactionType,
};
use cmms_purchasing::weighted_average_cost;

use crate::audit::{AuditEntry, AuditSink};
use crate::auto_reorder::AutoReorder;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{LedgerStore, StoreError, TransactionQuery, UnitOfWork};

/// A single-location quantity change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Movement {
    Receive(i64),
    Issue(i64),
    /// Signed delta.
    Adjust(i64),
    /// Counted quantity; the delta is `counted - current`.
    Count(i64),
}

impl Movement {
    pub fn kind(self) -> TransactionType {
        match self {
            Movement::Receive(_) => TransactionType::Receive,
            Movement::Issue(_) => TransactionType::Issue,
            Movement::Adjust(_) => TransactionType::Adjust,
            Movement::Count(_) => TransactionType::StockCount,
        }
    }

    pub fn capability(self) -> Capability {
        match self {
            Movement::Receive(_) => Capability::ReceiveStock,
            Movement::Issue(_) => Capability::IssueStock,
            Movement::Adjust(_) => Capability::AdjustStock,
            Movement::Count(_) => Capability::CountStock,
        }
    }

    /// Value recorded in `InventoryTransaction::quantity`.
    fn recorded_quantity(self) -> i64 {
        match self {
            Movement::Receive(q) | Movement::Issue(q) | Movement::Count(q) => q,
            Movement::Adjust(delta) => delta.abs(),
        }
    }

    fn plan(self, item: &StockItem) -> Result<StockChange, DomainError> {
        match self {
            Movement::Receive(q) => item.plan_receive(q),
            Movement::Issue(q) => item.plan_issue(q),
            Movement::Adjust(delta) => item.plan_adjust(delta),
            Movement::Count(counted) => item.plan_count(counted),
        }
    }
}

/// Everything a mutation wrote, handed from the planning step to the log writer.
#[derive(Debug, Clone)]
pub(crate) struct Posting {
    pub transaction: InventoryTransaction,
    pub history: Vec<StockHistoryEntry>,
    pub part: Part,
}

/// Current stock of one part across its locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevels {
    pub part_id: PartId,
    /// The part's recorded mirror.
    pub total: i64,
    pub items: Vec<StockItem>,
}

#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    auto_reorder: Option<AutoReorder>,
}

impl StockLedger {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            audit,
            auto_reorder: None,
        }
    }

    pub fn with_auto_reorder(mut self, auto_reorder: AutoReorder) -> Self {
        self.auto_reorder = Some(auto_reorder);
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    #[instrument(skip(self, ctx, metadata), fields(tenant = %ctx.tenant_id, part = %part_id, location = %location_id, idempotency_key = %key), err)]
    pub fn receive(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        quantity: i64,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        self.apply_movement(ctx, part_id, location_id, Movement::Receive(quantity), key, metadata)
    }

    #[instrument(skip(self, ctx, metadata), fields(tenant = %ctx.tenant_id, part = %part_id, location = %location_id, idempotency_key = %key), err)]
    pub fn issue(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        quantity: i64,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        self.apply_movement(ctx, part_id, location_id, Movement::Issue(quantity), key, metadata)
    }

    #[instrument(skip(self, ctx, metadata), fields(tenant = %ctx.tenant_id, part = %part_id, location = %location_id, idempotency_key = %key), err)]
    pub fn adjust(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        delta: i64,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        self.apply_movement(ctx, part_id, location_id, Movement::Adjust(delta), key, metadata)
    }

    #[instrument(skip(self, ctx, metadata), fields(tenant = %ctx.tenant_id, part = %part_id, location = %location_id, idempotency_key = %key), err)]
    pub fn stock_count(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        counted: i64,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        self.apply_movement(ctx, part_id, location_id, Movement::Count(counted), key, metadata)
    }

    pub fn apply_movement(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        movement: Movement,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        authorize(ctx, movement.capability())?;
        self.execute(ctx, key, |uow, now| {
            post_movement(uow, ctx, part_id, location_id, movement, key, metadata, now)
        })
    }

    /// Move stock between two locations as one transaction with `delta == 0`.
    #[instrument(skip(self, ctx, metadata), fields(tenant = %ctx.tenant_id, part = %part_id, from = %from_location_id, to = %to_location_id, idempotency_key = %key), err)]
    pub fn transfer(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        from_location_id: LocationId,
        to_location_id: LocationId,
        quantity: i64,
        key: &IdempotencyKey,
        metadata: TransactionMetadata,
    ) -> LedgerResult<InventoryTransaction> {
        authorize(ctx, Capability::TransferStock)?;
        if from_location_id == to_location_id {
            return Err(DomainError::invalid_input(
                "transfer source and destination must differ",
            )
            .into());
        }
        ensure_positive(quantity)?;

        self.execute(ctx, key, |uow, now| {
            let tenant_id = ctx.tenant_id;
            let part = require_part(uow, tenant_id, part_id)?;
            let source = require_location(uow, tenant_id, from_location_id)?;
            let dest = require_location(uow, tenant_id, to_location_id)?;
            ensure_active(&dest)?;

            // Lock in a fixed order so two opposite transfers cannot deadlock.
            let (first, second) = if from_location_id < to_location_id {
                (from_location_id, to_location_id)
            } else {
                (to_location_id, from_location_id)
            };
            let first_item = load_item(uow, ctx, &part, &source, &dest, first, now)?;
            let second_item = load_item(uow, ctx, &part, &source, &dest, second, now)?;
            let (mut from_item, mut to_item) = if first == from_location_id {
                (first_item, second_item)
            } else {
                (second_item, first_item)
            };

            let out = from_item.plan_issue(quantity)?;
            let inc = to_item.plan_receive(quantity)?;
            from_item.apply(out, now);
            to_item.apply(inc, now);
            uow.put_stock_item(&from_item)?;
            uow.put_stock_item(&to_item)?;

            let transaction = InventoryTransaction {
                id: TransactionId::generate(),
                tenant_id,
                kind: TransactionType::Transfer,
                part_id,
                quantity,
                delta: 0,
                idempotency_key: key.clone(),
                location_id: None,
                from_location_id: Some(from_location_id),
                to_location_id: Some(to_location_id),
                location_quantity_after: None,
                from_location_quantity_after: Some(from_item.quantity),
                to_location_quantity_after: Some(to_item.quantity),
                part_quantity_after: part.quantity,
                metadata,
                created_by: ctx.user_id,
                created_at: now,
            };
            let history = vec![
                history_row(
                    &transaction,
                    &from_item,
                    out.delta,
                    format!("Transfer to {}", dest.label()),
                ),
                history_row(
                    &transaction,
                    &to_item,
                    inc.delta,
                    format!("Transfer from {}", source.label()),
                ),
            ];
            Ok(Posting {
                transaction,
                history,
                part,
            })
        })
    }

    /// Shared mutation driver: idempotency short-circuit, log writes, commit,
    /// duplicate-race recovery and the after-commit side effects.
    pub(crate) fn execute<F>(
        &self,
        ctx: &RequestContext,
        key: &IdempotencyKey,
        body: F,
    ) -> LedgerResult<InventoryTransaction>
    where
        F: FnOnce(&mut dyn UnitOfWork, DateTime<Utc>) -> LedgerResult<Posting>,
    {
        let mut uow = self.store.begin()?;
        if let Some(existing) = uow.find_transaction(ctx.tenant_id, key)? {
            debug!(transaction = %existing.id, "idempotency key already recorded; returning prior result");
            return Ok(existing);
        }

        let now = Utc::now();
        let written = body(uow.as_mut(), now).and_then(|posting| {
            uow.insert_transaction(&posting.transaction)?;
            for row in &posting.history {
                uow.insert_history(row)?;
            }
            Ok(posting)
        });
        let posting = match written {
            Ok(posting) => posting,
            Err(LedgerError::Store(StoreError::DuplicateKey(msg))) => {
                drop(uow);
                return self.replay_winner(ctx.tenant_id, key, msg);
            }
            Err(e) => return Err(e),
        };

        match uow.commit() {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(msg)) => return self.replay_winner(ctx.tenant_id, key, msg),
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction = %posting.transaction.id,
            kind = %posting.transaction.kind,
            delta = posting.transaction.delta,
            part_quantity_after = posting.transaction.part_quantity_after,
            "inventory transaction committed"
        );
        self.after_commit(ctx, &posting);
        Ok(posting.transaction)
    }

    /// A concurrent caller committed the same key first: hand back its result.
    fn replay_winner(
        &self,
        tenant_id: TenantId,
        key: &IdempotencyKey,
        msg: String,
    ) -> LedgerResult<InventoryTransaction> {
        let mut uow = self.store.begin()?;
        match uow.find_transaction(tenant_id, key)? {
            Some(winner) => {
                debug!(transaction = %winner.id, "lost idempotency race; returning winner");
                Ok(winner)
            }
            // The clash was on something else (e.g. a stock cell created concurrently).
            None => Err(DomainError::conflict(format!("concurrent write, retry: {msg}")).into()),
        }
    }

    fn after_commit(&self, ctx: &RequestContext, posting: &Posting) {
        let tx = &posting.transaction;
        let entry = AuditEntry::new(
            ctx.tenant_id,
            format!("inventory.{}", tx.kind),
            "InventoryTransaction",
            tx.id,
            ctx.user_id,
        )
        .with_metadata(json!({
            "partId": tx.part_id,
            "idempotencyKey": tx.idempotency_key,
            "quantity": tx.quantity,
            "delta": tx.delta,
            "locationId": tx.location_id,
            "fromLocationId": tx.from_location_id,
            "toLocationId": tx.to_location_id,
            "partQuantityAfter": tx.part_quantity_after,
        }));
        if let Err(e) = self.audit.log_entry(entry) {
            warn!(tenant = %ctx.tenant_id, transaction = %tx.id, error = %e, "audit sink failed");
        }

        // Net part delta; a transfer moves stock without lowering it.
        let lowered = tx.delta < 0;
        if let Some(auto) = &self.auto_reorder {
            if lowered && posting.part.auto_reorder_due(tx.created_at, auto.cooldown()) {
                auto.run_suppressed(ctx.tenant_id, tx.part_id, ctx.user_id);
            }
        }
    }

    // -- reads --

    pub fn stock_levels(&self, ctx: &RequestContext, part_id: PartId) -> LedgerResult<StockLevels> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        let part = require_part(uow.as_mut(), ctx.tenant_id, part_id)?;
        let items = uow.list_stock_items(ctx.tenant_id, Some(part_id))?;
        Ok(StockLevels {
            part_id,
            total: part.quantity,
            items,
        })
    }

    pub fn get_transaction(
        &self,
        ctx: &RequestContext,
        key: &IdempotencyKey,
    ) -> LedgerResult<Option<InventoryTransaction>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.find_transaction(ctx.tenant_id, key)?)
    }

    /// Newest first.
    pub fn list_transactions(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<InventoryTransaction>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.list_transactions(
            ctx.tenant_id,
            TransactionQuery {
                part_id,
                location_id: None,
                limit,
            },
        )?)
    }

    /// Quantity series at one location, replayed from the log's snapshots.
    pub fn quantity_history(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
    ) -> LedgerResult<Vec<QuantityPoint>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        let log = uow.list_transactions(
            ctx.tenant_id,
            TransactionQuery {
                part_id,
                location_id: Some(location_id),
                limit: None,
            },
        )?;
        Ok(replay_quantities(location_id, &log))
    }

    /// History rows of one stock item, oldest first. Empty if it was never touched.
    pub fn stock_history(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
    ) -> LedgerResult<Vec<StockHistoryEntry>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        let item = uow
            .list_stock_items(ctx.tenant_id, Some(part_id))?
            .into_iter()
            .find(|i| i.location_id == location_id);
        match item {
            Some(item) => Ok(uow.list_history(ctx.tenant_id, item.id)?),
            None => Ok(Vec::new()),
        }
    }
}

/// Plan and write one single-location movement. Does not touch the log.
#[allow(clippy::too_many_arguments)]
pub(crate) fn post_movement(
    uow: &mut dyn UnitOfWork,
    ctx: &RequestContext,
    part_id: PartId,
    location_id: LocationId,
    movement: Movement,
    key: &IdempotencyKey,
    metadata: TransactionMetadata,
    now: DateTime<Utc>,
) -> LedgerResult<Posting> {
    let tenant_id = ctx.tenant_id;
    let mut part = require_part(uow, tenant_id, part_id)?;
    let location = require_location(uow, tenant_id, location_id)?;
    if matches!(movement, Movement::Receive(_)) {
        ensure_active(&location)?;
    }

    let mut item = load_item(uow, ctx, &part, &location, &location, location_id, now)?;
    let change = movement.plan(&item)?;
    let part_after = part.plan_quantity_change(change.delta)?;

    if let (Movement::Receive(q), Some(cost)) = (movement, metadata.unit_cost) {
        if cost < 0 {
            return Err(DomainError::invalid_input("unit cost cannot be negative").into());
        }
        item.unit_cost = weighted_average_cost(item.unit_cost, item.quantity, cost, q);
        part.unit_cost = weighted_average_cost(part.unit_cost, part.quantity, cost, q);
    }
    item.apply(change, now);
    part.set_quantity(part_after, now);
    uow.put_stock_item(&item)?;
    uow.put_part(&part)?;

    let kind = movement.kind();
    let note = metadata
        .reason
        .clone()
        .unwrap_or_else(|| kind.to_string());
    let transaction = InventoryTransaction {
        id: TransactionId::generate(),
        tenant_id,
        kind,
        part_id,
        quantity: movement.recorded_quantity(),
        delta: change.delta,
        idempotency_key: key.clone(),
        location_id: Some(location_id),
        from_location_id: None,
        to_location_id: None,
        location_quantity_after: Some(item.quantity),
        from_location_quantity_after: None,
        to_location_quantity_after: None,
        part_quantity_after: part.quantity,
        metadata,
        created_by: ctx.user_id,
        created_at: now,
    };
    let history = vec![history_row(&transaction, &item, change.delta, note)];
    Ok(Posting {
        transaction,
        history,
        part,
    })
}

pub(crate) fn require_part(
    uow: &mut dyn UnitOfWork,
    tenant_id: TenantId,
    part_id: PartId,
) -> LedgerResult<Part> {
    uow.lock_part(tenant_id, part_id)?
        .ok_or_else(|| DomainError::not_found("part", part_id).into())
}

pub(crate) fn require_location(
    uow: &mut dyn UnitOfWork,
    tenant_id: TenantId,
    location_id: LocationId,
) -> LedgerResult<Location> {
    uow.get_location(tenant_id, location_id)?
        .ok_or_else(|| DomainError::not_found("location", location_id).into())
}

fn ensure_active(location: &Location) -> LedgerResult<()> {
    if !location.active {
        return Err(DomainError::invalid_input(format!(
            "location {} is inactive",
            location.label()
        ))
        .into());
    }
    Ok(())
}

/// Lock the stock item at `location_id`, creating it at zero if absent.
fn load_item(
    uow: &mut dyn UnitOfWork,
    ctx: &RequestContext,
    part: &Part,
    a: &Location,
    b: &Location,
    location_id: LocationId,
    now: DateTime<Utc>,
) -> LedgerResult<StockItem> {
    let key = StockKey::new(part.id, location_id);
    if let Some(item) = uow.lock_stock_item(ctx.tenant_id, key)? {
        return Ok(item);
    }
    let location = if a.id == location_id { a } else { b };
    let site = location.site_id.or(part.site_id).or(ctx.site_id);
    Ok(StockItem::empty(ctx.tenant_id, key, site, now))
}

fn history_row(
    transaction: &InventoryTransaction,
    item: &StockItem,
    delta: i64,
    note: String,
) -> StockHistoryEntry {
    StockHistoryEntry {
        id: HistoryEntryId::generate(),
        tenant_id: transaction.tenant_id,
        stock_item_id: item.id,
        part_id: item.part_id,
        location_id: item.location_id,
        transaction_id: transaction.id,
        delta,
        quantity_after: item.quantity,
        note,
        created_by: transaction.created_by,
        created_at: transaction.created_at,
    }
}
