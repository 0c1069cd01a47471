//! Purchase-order receipts posted to the stock ledger.
//!
//! The order line update and the ledger receive commit in the same unit of
//! work, keyed by the caller's idempotency key: a replayed receipt returns the
//! original transaction and leaves the order untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::DomainError;
use cmms_inventory::{IdempotencyKey, InventoryTransaction, LocationId, TransactionMetadata};
use cmms_purchasing::PurchaseOrderId;

use crate::error::LedgerResult;
use crate::ledger::{post_movement, Movement, Posting, StockLedger};
use crate::store::UnitOfWork;

/// One received quantity against one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptLine {
    pub purchase_order_id: PurchaseOrderId,
    pub line_no: u32,
    pub quantity: i64,
    /// Overrides the line's delivery location.
    pub location_id: Option<LocationId>,
}

#[derive(Clone)]
pub struct ReceiptBridge {
    ledger: StockLedger,
}

impl ReceiptBridge {
    pub fn new(ledger: StockLedger) -> Self {
        Self { ledger }
    }

    /// Receive against a line, clamped to what is still outstanding.
    ///
    /// The transaction records the accepted quantity and carries the line's
    /// unit cost, so the part's weighted-average cost moves with it.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, purchase_order = %line.purchase_order_id, line_no = line.line_no, idempotency_key = %key), err)]
    pub fn receive_line(
        &self,
        ctx: &RequestContext,
        line: ReceiptLine,
        key: &IdempotencyKey,
    ) -> LedgerResult<InventoryTransaction> {
        authorize(ctx, Capability::ReceivePurchaseOrder)?;
        self.ledger
            .execute(ctx, key, |uow, now| post_receipt(uow, ctx, line, key, now))
    }
}

fn post_receipt(
    uow: &mut dyn UnitOfWork,
    ctx: &RequestContext,
    line: ReceiptLine,
    key: &IdempotencyKey,
    now: DateTime<Utc>,
) -> LedgerResult<Posting> {
    let mut order = uow
        .lock_purchase_order(ctx.tenant_id, line.purchase_order_id)?
        .ok_or_else(|| DomainError::not_found("purchase order", line.purchase_order_id))?;
    let receipt = order.receive_line(line.line_no, line.quantity, now)?;
    let location_id = line.location_id.or(receipt.location_id).ok_or_else(|| {
        DomainError::invalid_input(format!(
            "line {} of {} has no delivery location; name one on the receipt",
            line.line_no, order.number
        ))
    })?;

    let mut metadata = TransactionMetadata::with_reason(format!("Received on {}", order.number))
        .with_reference(order.number.clone());
    metadata.unit_cost = Some(receipt.unit_cost);
    metadata
        .extra
        .insert("purchaseOrderId".to_string(), json!(order.id));
    metadata
        .extra
        .insert("lineNo".to_string(), json!(receipt.line_no));

    uow.put_purchase_order(&order)?;
    let posting = post_movement(
        uow,
        ctx,
        receipt.part_id,
        location_id,
        Movement::Receive(receipt.accepted),
        key,
        metadata,
        now,
    )?;

    info!(
        purchase_order = %order.id,
        line_no = receipt.line_no,
        accepted = receipt.accepted,
        received_total = receipt.quantity_received,
        order_status = %receipt.order_status,
        "purchase order line received"
    );
    Ok(posting)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use crate::store::LedgerStore;
    use cmms_auth::Role;
    use cmms_core::ErrorCategory;
    use cmms_inventory::{PartId, VendorId};
    use cmms_purchasing::{NewLine, PurchaseOrder, PurchaseOrderStatus};

    fn approved_order(fx: &Fixture, part: PartId, location: Option<LocationId>, qty: i64, cost: i64) -> PurchaseOrderId {
        let now = Utc::now();
        let mut order = PurchaseOrder::draft(
            fx.tenant,
            VendorId::generate(),
            "PO-100",
            vec![NewLine {
                part_id: part,
                location_id: location,
                quantity: qty,
                unit_cost: cost,
            }],
            now,
        )
        .unwrap();
        order.transition(PurchaseOrderStatus::Pending, now).unwrap();
        order.transition(PurchaseOrderStatus::Approved, now).unwrap();
        let mut uow = fx.store.begin().unwrap();
        uow.put_purchase_order(&order).unwrap();
        uow.commit().unwrap();
        order.id
    }

    fn order(fx: &Fixture, id: PurchaseOrderId) -> PurchaseOrder {
        let mut uow = fx.store.begin().unwrap();
        uow.lock_purchase_order(fx.tenant, id).unwrap().unwrap()
    }

    #[test]
    fn receipt_updates_line_stock_and_cost_together() {
        let fx = Fixture::new();
        let part = fx.part("Pump seal");
        let bin = fx.location("R-1");
        let po = approved_order(&fx, part, Some(bin), 10, 250);
        let bridge = ReceiptBridge::new(fx.ledger.clone());
        let clerk = fx.ctx_with(Role::Clerk);

        let tx = bridge
            .receive_line(
                &clerk,
                ReceiptLine {
                    purchase_order_id: po,
                    line_no: 1,
                    quantity: 4,
                    location_id: None,
                },
                &fx.key("rcv-1"),
            )
            .unwrap();
        assert_eq!(tx.delta, 4);
        assert_eq!(tx.metadata.reference.as_deref(), Some("PO-100"));
        assert_eq!(tx.metadata.extra["lineNo"], 1);
        assert_eq!(fx.quantity_at(part, bin), 4);
        assert_eq!(fx.load_part(part).unit_cost, Some(250));

        let after = order(&fx, po);
        assert_eq!(after.status, PurchaseOrderStatus::Ordered);
        assert_eq!(after.lines[0].quantity_received, 4);
    }

    #[test]
    fn replayed_receipt_does_not_double_count_the_line() {
        let fx = Fixture::new();
        let part = fx.part("Gear");
        let bin = fx.location("R-2");
        let po = approved_order(&fx, part, Some(bin), 10, 100);
        let bridge = ReceiptBridge::new(fx.ledger.clone());
        let line = ReceiptLine {
            purchase_order_id: po,
            line_no: 1,
            quantity: 6,
            location_id: None,
        };

        let first = bridge.receive_line(&fx.ctx, line, &fx.key("rcv-a")).unwrap();
        let again = bridge.receive_line(&fx.ctx, line, &fx.key("rcv-a")).unwrap();
        assert_eq!(first, again);
        assert_eq!(order(&fx, po).lines[0].quantity_received, 6);
        assert_eq!(fx.quantity_at(part, bin), 6);
    }

    #[test]
    fn over_receipt_is_clamped_and_completes_the_order() {
        let fx = Fixture::new();
        let part = fx.part("Shaft");
        let bin = fx.location("R-3");
        let po = approved_order(&fx, part, Some(bin), 5, 100);
        let bridge = ReceiptBridge::new(fx.ledger.clone());

        let tx = bridge
            .receive_line(
                &fx.ctx,
                ReceiptLine {
                    purchase_order_id: po,
                    line_no: 1,
                    quantity: 8,
                    location_id: None,
                },
                &fx.key("rcv-over"),
            )
            .unwrap();
        assert_eq!(tx.quantity, 5);
        assert_eq!(order(&fx, po).status, PurchaseOrderStatus::Received);
    }

    #[test]
    fn missing_location_rolls_back_the_line_update() {
        let fx = Fixture::new();
        let part = fx.part("Coupling");
        let po = approved_order(&fx, part, None, 5, 100);
        let bridge = ReceiptBridge::new(fx.ledger.clone());

        let err = bridge
            .receive_line(
                &fx.ctx,
                ReceiptLine {
                    purchase_order_id: po,
                    line_no: 1,
                    quantity: 2,
                    location_id: None,
                },
                &fx.key("rcv-nowhere"),
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        let after = order(&fx, po);
        assert_eq!(after.lines[0].quantity_received, 0);
        assert_eq!(after.status, PurchaseOrderStatus::Approved);
    }

    #[test]
    fn draft_orders_cannot_be_received() {
        let fx = Fixture::new();
        let part = fx.part("Nozzle");
        let bin = fx.location("R-4");
        let draft = PurchaseOrder::draft(
            fx.tenant,
            VendorId::generate(),
            "PO-D",
            vec![NewLine {
                part_id: part,
                location_id: Some(bin),
                quantity: 3,
                unit_cost: 10,
            }],
            Utc::now(),
        )
        .unwrap();
        {
            let mut uow = fx.store.begin().unwrap();
            uow.put_purchase_order(&draft).unwrap();
            uow.commit().unwrap();
        }
        let err = ReceiptBridge::new(fx.ledger.clone())
            .receive_line(
                &fx.ctx,
                ReceiptLine {
                    purchase_order_id: draft.id,
                    line_no: 1,
                    quantity: 1,
                    location_id: None,
                },
                &fx.key("rcv-draft"),
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unprocessable);
        assert_eq!(fx.quantity_at(part, bin), 0);
    }
}
