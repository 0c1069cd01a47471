//! Shared fixture for unit and scenario tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};

use cmms_auth::{RequestContext, Role};
use cmms_core::{TenantId, UserId};
use cmms_inventory::{
    IdempotencyKey, Location, LocationId, NewLocation, NewPart, Part, PartId, ReorderSettings,
    StockKey, TransactionMetadata,
};

use crate::audit::InMemoryAuditSink;
use crate::auto_reorder::AutoReorder;
use crate::ledger::StockLedger;
use crate::store::{InMemoryLedgerStore, LedgerStore};

pub(crate) struct Fixture {
    pub store: Arc<InMemoryLedgerStore>,
    pub audit: Arc<InMemoryAuditSink>,
    pub ledger: StockLedger,
    pub tenant: TenantId,
    pub ctx: RequestContext,
    seq: AtomicU64,
}

impl Fixture {
    pub fn new() -> Self {
        Self::for_tenant(Arc::new(InMemoryLedgerStore::new()), TenantId::new())
    }

    /// Second tenant sharing the same store.
    pub fn for_tenant(store: Arc<InMemoryLedgerStore>, tenant: TenantId) -> Self {
        let audit = Arc::new(InMemoryAuditSink::new());
        let dyn_store: Arc<dyn LedgerStore> = store.clone();
        let ledger = StockLedger::new(dyn_store.clone(), audit.clone()).with_auto_reorder(
            AutoReorder::new(dyn_store, audit.clone(), Duration::hours(24)),
        );
        Self {
            store,
            audit,
            ledger,
            tenant,
            ctx: RequestContext::system(tenant).with_user(UserId::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }

    pub fn ctx_with(&self, role: Role) -> RequestContext {
        RequestContext::new(self.tenant)
            .with_user(UserId::new())
            .with_role(role)
    }

    pub fn key(&self, raw: &str) -> IdempotencyKey {
        IdempotencyKey::parse(raw).unwrap()
    }

    pub fn part(&self, name: &str) -> PartId {
        self.part_with(name, ReorderSettings::default())
    }

    pub fn part_with(&self, name: &str, settings: ReorderSettings) -> PartId {
        let part = Part::register(
            self.tenant,
            PartId::generate(),
            NewPart {
                name: name.to_string(),
                settings,
                ..NewPart::default()
            },
            Utc::now(),
        )
        .unwrap();
        let mut uow = self.store.begin().unwrap();
        uow.put_part(&part).unwrap();
        uow.commit().unwrap();
        part.id
    }

    pub fn location(&self, code: &str) -> LocationId {
        let location = Location::create(
            self.tenant,
            LocationId::generate(),
            NewLocation {
                name: format!("Bin {code}"),
                code: Some(code.to_string()),
                ..NewLocation::default()
            },
            Utc::now(),
        )
        .unwrap();
        let mut uow = self.store.begin().unwrap();
        uow.put_location(&location).unwrap();
        uow.commit().unwrap();
        location.id
    }

    pub fn seed(&self, part: PartId, location: LocationId, quantity: i64) {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = self.key(&format!("seed-{n}"));
        self.ledger
            .receive(&self.ctx, part, location, quantity, &key, TransactionMetadata::default())
            .unwrap();
    }

    pub fn load_part(&self, part: PartId) -> Part {
        let mut uow = self.store.begin().unwrap();
        uow.lock_part(self.tenant, part).unwrap().unwrap()
    }

    pub fn part_quantity(&self, part: PartId) -> i64 {
        self.load_part(part).quantity
    }

    pub fn quantity_at(&self, part: PartId, location: LocationId) -> i64 {
        let mut uow = self.store.begin().unwrap();
        uow.lock_stock_item(self.tenant, StockKey::new(part, location))
            .unwrap()
            .map_or(0, |i| i.quantity)
    }

    /// Overwrite catalog fields directly, bypassing the ledger.
    pub fn edit_part(&self, part: PartId, edit: impl FnOnce(&mut Part)) {
        let mut uow = self.store.begin().unwrap();
        let mut p = uow.lock_part(self.tenant, part).unwrap().unwrap();
        edit(&mut p);
        uow.put_part(&p).unwrap();
        uow.commit().unwrap();
    }
}
