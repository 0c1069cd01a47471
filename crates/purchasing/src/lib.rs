//! Purchasing domain: the purchase-order record the stock ledger integrates with.
//!
//! Pure, deterministic domain logic (no IO, no storage). Approval workflow and
//! vendor management live outside this crate; only the status graph, receipts
//! and on-order demand are modelled here.

pub mod cost;
pub mod order;

pub use cost::weighted_average_cost;
pub use order::{
    on_order_by_part, LineReceipt, NewLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderLine,
    PurchaseOrderStatus,
};
