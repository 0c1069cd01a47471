use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Role;

/// Something a caller may do to the inventory ledger.
///
/// Each capability names the lowest tier that holds it; a role's capability set
/// is every capability at or below its rank.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewInventory,
    ReceiveStock,
    IssueStock,
    AdjustStock,
    CountStock,
    TransferStock,
    ManageCatalog,
    ReceivePurchaseOrder,
    ManagePurchaseOrders,
    ManageReorders,
    RunReconciliation,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::ViewInventory,
        Capability::ReceiveStock,
        Capability::IssueStock,
        Capability::AdjustStock,
        Capability::CountStock,
        Capability::TransferStock,
        Capability::ManageCatalog,
        Capability::ReceivePurchaseOrder,
        Capability::ManagePurchaseOrders,
        Capability::ManageReorders,
        Capability::RunReconciliation,
    ];

    /// Lowest role tier granted this capability.
    pub fn minimum_role(self) -> Role {
        match self {
            Capability::ViewInventory => Role::Viewer,
            Capability::ReceiveStock | Capability::ReceivePurchaseOrder => Role::Clerk,
            Capability::IssueStock => Role::Operator,
            Capability::AdjustStock
            | Capability::CountStock
            | Capability::TransferStock
            | Capability::ManageCatalog => Role::Supervisor,
            Capability::ManagePurchaseOrders | Capability::ManageReorders => Role::Manager,
            Capability::RunReconciliation => Role::Admin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::ViewInventory => "inventory.view",
            Capability::ReceiveStock => "inventory.receive",
            Capability::IssueStock => "inventory.issue",
            Capability::AdjustStock => "inventory.adjust",
            Capability::CountStock => "inventory.count",
            Capability::TransferStock => "inventory.transfer",
            Capability::ManageCatalog => "inventory.catalog",
            Capability::ReceivePurchaseOrder => "purchasing.receive",
            Capability::ManagePurchaseOrders => "purchasing.manage",
            Capability::ManageReorders => "inventory.reorders",
            Capability::RunReconciliation => "inventory.reconcile",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    /// Every capability held by this tier.
    pub fn capabilities(self) -> BTreeSet<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.satisfies(c.minimum_role()))
            .collect()
    }
}
