use serde::{Deserialize, Serialize};

use cmms_core::{SiteId, TenantId, UserId};

use crate::Role;

/// Per-call context handed to the core by the (excluded) HTTP layer.
///
/// Tenant resolution and authentication already happened upstream; the core only
/// trusts what is in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: TenantId,
    pub site_id: Option<SiteId>,
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            site_id: None,
            user_id: None,
            roles: Vec::new(),
        }
    }

    pub fn with_site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    /// Context for background jobs acting on behalf of the system.
    pub fn system(tenant_id: TenantId) -> Self {
        Self::new(tenant_id).with_role(Role::Admin)
    }

    /// Highest tier held, if any.
    pub fn highest_role(&self) -> Option<Role> {
        self.roles.iter().copied().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_role_is_by_rank() {
        let ctx = RequestContext::new(TenantId::new())
            .with_role(Role::Supervisor)
            .with_role(Role::Clerk);
        assert_eq!(ctx.highest_role(), Some(Role::Supervisor));
        assert_eq!(RequestContext::new(TenantId::new()).highest_role(), None);
    }
}
