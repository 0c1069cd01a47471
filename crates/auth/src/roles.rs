use core::str::FromStr;

use serde::{Deserialize, Serialize};

use cmms_core::DomainError;

/// Role tier used for RBAC.
///
/// Tiers form a total order: a higher tier holds every capability of the tiers
/// below it. Checks compare ranks, never role names.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Stockroom clerk: receives goods.
    Clerk,
    /// Technician/operator: issues parts to work.
    Operator,
    /// Adjusts, counts and transfers stock.
    Supervisor,
    /// Runs the reorder workflow and purchasing.
    Manager,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Viewer,
        Role::Clerk,
        Role::Operator,
        Role::Supervisor,
        Role::Manager,
        Role::Admin,
    ];

    /// Numeric rank (0 = lowest).
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Clerk => "clerk",
            Role::Operator => "operator",
            Role::Supervisor => "supervisor",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    /// Whether this tier is at least `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    /// Accepts the tier names plus the legacy aliases the HTTP layer still sends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" | "readonly" | "read_only" | "requester" => Ok(Role::Viewer),
            "clerk" | "storeroom" | "stockroom" => Ok(Role::Clerk),
            "operator" | "technician" | "tech" => Ok(Role::Operator),
            "supervisor" | "planner" => Ok(Role::Supervisor),
            "manager" | "purchasing" => Ok(Role::Manager),
            "admin" | "owner" => Ok(Role::Admin),
            other => Err(DomainError::invalid_input(format!("unknown role '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        for pair in Role::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[1].satisfies(pair[0]));
            assert!(!pair[0].satisfies(pair[1]));
        }
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("Technician".parse::<Role>().unwrap(), Role::Operator);
        assert_eq!(" supervisor ".parse::<Role>().unwrap(), Role::Supervisor);
        assert!("superuser-ish".parse::<Role>().is_err());
    }
}
