use serde::Serialize;
use thiserror::Error;

use cmms_core::{DomainError, TenantId};

use crate::{Capability, RequestContext, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: '{capability}' requires {required}, caller holds {held}")]
    Forbidden {
        capability: Capability,
        required: Role,
        held: String,
    },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        DomainError::forbidden(value.to_string())
    }
}

/// Authorize a caller for a capability by rank comparison.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(ctx: &RequestContext, capability: Capability) -> Result<(), AuthzError> {
    let required = capability.minimum_role();
    match ctx.highest_role() {
        Some(held) if held.satisfies(required) => Ok(()),
        held => Err(AuthzError::Forbidden {
            capability,
            required,
            held: held.map_or_else(|| "no role".to_string(), |r| r.to_string()),
        }),
    }
}

/// Refuse records that belong to a different tenant than the caller's.
pub fn ensure_tenant(ctx: &RequestContext, owner: TenantId) -> Result<(), AuthzError> {
    if ctx.tenant_id == owner {
        Ok(())
    } else {
        Err(AuthzError::TenantMismatch)
    }
}

/// Detailed explanation of an authorization decision (audit trail).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub capability: Capability,
    pub granted: bool,
    pub required_role: Role,
    pub held_role: Option<Role>,
    pub effective_capabilities: Vec<Capability>,
    pub reason: String,
}

/// Explain why an authorization decision was made (or would be made).
pub fn explain_authorization(
    ctx: &RequestContext,
    capability: Capability,
) -> AuthorizationExplanation {
    let required_role = capability.minimum_role();
    let held_role = ctx.highest_role();
    let effective_capabilities: Vec<Capability> = held_role
        .map(|r| r.capabilities().into_iter().collect())
        .unwrap_or_default();
    let granted = authorize(ctx, capability).is_ok();

    let reason = match held_role {
        None => format!("caller holds no role; '{capability}' requires {required_role}"),
        Some(held) if granted => {
            format!("{held} (rank {}) is at or above {required_role}", held.rank())
        }
        Some(held) => format!(
            "{held} (rank {}) is below {required_role} (rank {})",
            held.rank(),
            required_role.rank()
        ),
    };

    AuthorizationExplanation {
        capability,
        granted,
        required_role,
        held_role,
        effective_capabilities,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx(role: Role) -> RequestContext {
        RequestContext::new(TenantId::new()).with_role(role)
    }

    #[test]
    fn clerk_can_receive_but_not_issue() {
        assert!(authorize(&ctx(Role::Clerk), Capability::ReceiveStock).is_ok());
        let err = authorize(&ctx(Role::Clerk), Capability::IssueStock).unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden { required: Role::Operator, .. }));
    }

    #[test]
    fn no_role_is_forbidden() {
        let err = authorize(&RequestContext::new(TenantId::new()), Capability::ViewInventory)
            .unwrap_err();
        assert!(err.to_string().contains("no role"));
        let domain: DomainError = err.into();
        assert!(matches!(domain, DomainError::Forbidden(_)));
    }

    #[test]
    fn tenant_mismatch_is_rejected() {
        let c = ctx(Role::Admin);
        assert!(ensure_tenant(&c, c.tenant_id).is_ok());
        assert_eq!(ensure_tenant(&c, TenantId::new()), Err(AuthzError::TenantMismatch));
    }

    #[test]
    fn explanation_reports_ranks() {
        let e = explain_authorization(&ctx(Role::Operator), Capability::TransferStock);
        assert!(!e.granted);
        assert_eq!(e.required_role, Role::Supervisor);
        assert!(e.reason.contains("below"));
        assert!(e.effective_capabilities.contains(&Capability::IssueStock));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        /// Property: a decision depends only on rank, never on the order roles were granted.
        #[test]
        fn decision_is_rank_monotone(held in 0usize..6, cap in 0usize..11) {
            let role = Role::ALL[held];
            let capability = Capability::ALL[cap];
            let granted = authorize(&ctx(role), capability).is_ok();
            prop_assert_eq!(granted, role >= capability.minimum_role());
            if granted {
                for higher in Role::ALL.iter().filter(|r| **r > role) {
                    prop_assert!(authorize(&ctx(*higher), capability).is_ok());
                }
            }
        }
    }
}
