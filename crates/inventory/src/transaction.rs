use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, TenantId, TenantScoped, UserId};

use crate::location::LocationId;
use crate::part::PartId;
use crate::stock::StockItemId;

entity_id!(
    /// Inventory transaction identifier.
    TransactionId
);

entity_id!(
    /// Stock history row identifier.
    HistoryEntryId
);

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 200;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Receive,
    Issue,
    Adjust,
    Transfer,
    StockCount,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Receive => "receive",
            TransactionType::Issue => "issue",
            TransactionType::Adjust => "adjust",
            TransactionType::Transfer => "transfer",
            TransactionType::StockCount => "stock_count",
        }
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(TransactionType::Receive),
            "issue" => Ok(TransactionType::Issue),
            "adjust" => Ok(TransactionType::Adjust),
            "transfer" => Ok(TransactionType::Transfer),
            "stock_count" => Ok(TransactionType::StockCount),
            other => Err(DomainError::invalid_input(format!(
                "unknown transaction type '{other}'"
            ))),
        }
    }
}

/// Caller-supplied token that makes a mutation safe to retry.
///
/// Unique per tenant. Recommended to be one UUID per logical intent, not per
/// transport retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_input("idempotency key is required"));
        }
        if trimmed.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(DomainError::invalid_input(format!(
                "idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derive a child key, e.g. one ledger receipt per purchase-order line.
    pub fn derive(&self, suffix: impl core::fmt::Display) -> DomainResult<Self> {
        Self::parse(format!("{}:{suffix}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form reason and receipt linkage attached to a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// External reference such as a purchase order number or work order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Unit cost (minor units) of received goods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionMetadata {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: i64) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Immutable record of one ledger mutation.
///
/// Single-location operations fill `location_id`/`location_quantity_after`;
/// transfers fill the `from_`/`to_` pairs and carry `delta == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub part_id: PartId,
    pub quantity: i64,
    pub delta: i64,
    pub idempotency_key: IdempotencyKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<LocationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_location_id: Option<LocationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_location_id: Option<LocationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_quantity_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_location_quantity_after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_location_quantity_after: Option<i64>,
    pub part_quantity_after: i64,
    pub metadata: TransactionMetadata,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl InventoryTransaction {
    /// Quantity at `location` right after this transaction, if it touched it.
    pub fn quantity_after_at(&self, location: LocationId) -> Option<i64> {
        if self.location_id == Some(location) {
            return self.location_quantity_after;
        }
        if self.from_location_id == Some(location) {
            return self.from_location_quantity_after;
        }
        if self.to_location_id == Some(location) {
            return self.to_location_quantity_after;
        }
        None
    }

    pub fn touches(&self, location: LocationId) -> bool {
        self.location_id == Some(location)
            || self.from_location_id == Some(location)
            || self.to_location_id == Some(location)
    }
}

impl Entity for InventoryTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for InventoryTransaction {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// One row per touched stock item per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockHistoryEntry {
    pub id: HistoryEntryId,
    pub tenant_id: TenantId,
    pub stock_item_id: StockItemId,
    pub part_id: PartId,
    pub location_id: LocationId,
    pub transaction_id: TransactionId,
    pub delta: i64,
    pub quantity_after: i64,
    pub note: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// A point in a replayed quantity series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityPoint {
    pub transaction_id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub quantity_after: i64,
    pub at: DateTime<Utc>,
}

/// Replay the "quantity after" snapshots of `location` from log entries, oldest first.
pub fn replay_quantities<'a, I>(location: LocationId, transactions: I) -> Vec<QuantityPoint>
where
    I: IntoIterator<Item = &'a InventoryTransaction>,
{
    let mut points: Vec<QuantityPoint> = transactions
        .into_iter()
        .filter_map(|t| {
            t.quantity_after_at(location).map(|q| QuantityPoint {
                transaction_id: t.id,
                kind: t.kind,
                quantity_after: q,
                at: t.created_at,
            })
        })
        .collect();
    points.sort_by_key(|p| (p.at, p.transaction_id));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idempotency_keys_are_trimmed_and_bounded() {
        assert_eq!(IdempotencyKey::parse("  abc ").unwrap().as_str(), "abc");
        assert!(IdempotencyKey::parse("   ").is_err());
        assert!(IdempotencyKey::parse("x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
        let err = serde_json::from_value::<IdempotencyKey>(json!("")).unwrap_err();
        assert!(err.to_string().contains("idempotency key"));
    }

    #[test]
    fn transfer_serializes_with_type_and_both_snapshots() {
        let (from, to) = (LocationId::generate(), LocationId::generate());
        let t = InventoryTransaction {
            id: TransactionId::generate(),
            tenant_id: TenantId::new(),
            kind: TransactionType::Transfer,
            part_id: PartId::generate(),
            quantity: 5,
            delta: 0,
            idempotency_key: IdempotencyKey::parse("k-1").unwrap(),
            location_id: None,
            from_location_id: Some(from),
            to_location_id: Some(to),
            location_quantity_after: None,
            from_location_quantity_after: Some(5),
            to_location_quantity_after: Some(5),
            part_quantity_after: 10,
            metadata: TransactionMetadata::with_reason("rebalance")
                .with_extra("workOrder", json!("WO-7")),
            created_by: None,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["type"], "transfer");
        assert_eq!(v["delta"], 0);
        assert_eq!(v["fromLocationQuantityAfter"], 5);
        assert_eq!(v["metadata"]["workOrder"], "WO-7");
        assert!(v.get("locationId").is_none());

        assert_eq!(t.quantity_after_at(from), Some(5));
        assert!(t.touches(to));
        assert_eq!(t.quantity_after_at(LocationId::generate()), None);
    }
}
