use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, SiteId, TenantId, TenantScoped};

entity_id!(
    /// Storage location identifier (tenant-scoped via `tenant_id`).
    LocationId
);

/// Parent chains deeper than this are treated as corrupt.
pub const MAX_LOCATION_DEPTH: usize = 32;

/// Named storage location, optionally nested under a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: LocationId,
    pub tenant_id: TenantId,
    pub site_id: Option<SiteId>,
    pub parent_id: Option<LocationId>,
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub site_id: Option<SiteId>,
    pub parent_id: Option<LocationId>,
}

impl Location {
    pub fn create(
        tenant_id: TenantId,
        id: LocationId,
        input: NewLocation,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if input.name.trim().is_empty() {
            return Err(DomainError::invalid_input("location name cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            site_id: input.site_id,
            parent_id: input.parent_id,
            name: input.name.trim().to_string(),
            code: input.code,
            description: input.description,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Human label used in history notes ("Transfer to <label>").
    pub fn label(&self) -> &str {
        self.code.as_deref().unwrap_or(&self.name)
    }
}

/// Check that re-parenting `location` under `new_parent` keeps the tree acyclic.
///
/// `parent_of` resolves a location's current parent within the same tenant and
/// returns `None` for unknown locations or roots.
pub fn ensure_acyclic<F>(
    location: LocationId,
    new_parent: Option<LocationId>,
    parent_of: F,
) -> DomainResult<()>
where
    F: Fn(LocationId) -> Option<LocationId>,
{
    let mut cursor = new_parent;
    let mut depth = 0;
    while let Some(current) = cursor {
        if current == location {
            return Err(DomainError::invalid_input(format!(
                "location {location} cannot be nested under its own descendant"
            )));
        }
        depth += 1;
        if depth > MAX_LOCATION_DEPTH {
            return Err(DomainError::invalid_input("location hierarchy is too deep"));
        }
        cursor = parent_of(current);
    }
    Ok(())
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for Location {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn rejects_cycles_and_self_parenting() {
        let (a, b, c) = (LocationId::generate(), LocationId::generate(), LocationId::generate());
        // a <- b <- c
        let parents: HashMap<LocationId, LocationId> = [(b, a), (c, b)].into_iter().collect();
        let lookup = |id: LocationId| parents.get(&id).copied();

        assert!(ensure_acyclic(a, Some(c), lookup).is_err());
        assert!(ensure_acyclic(a, Some(a), lookup).is_err());
        assert!(ensure_acyclic(c, Some(a), lookup).is_ok());
        assert!(ensure_acyclic(b, None, lookup).is_ok());
    }

    #[test]
    fn label_prefers_code() {
        let mut loc = Location::create(
            TenantId::new(),
            LocationId::generate(),
            NewLocation {
                name: "Main stores".to_string(),
                ..NewLocation::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(loc.label(), "Main stores");
        loc.code = Some("MS-01".to_string());
        assert_eq!(loc.label(), "MS-01");
    }
}
