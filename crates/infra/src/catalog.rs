//! Part catalog and location directory.
//!
//! Quantity is owned by the ledger; nothing here writes `Part::quantity`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::DomainError;
use cmms_inventory::{
    ensure_acyclic, Location, LocationId, NewLocation, NewPart, Part, PartId, ReorderSettings,
    ThresholdOverride,
};

use crate::audit::{self, AuditEntry, AuditSink};
use crate::error::LedgerResult;
use crate::ledger::{require_location, require_part};
use crate::store::LedgerStore;

/// Descriptive fields of a location; editable at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDetails {
    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Register a part at zero quantity.
    #[instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id), err)]
    pub fn register_part(&self, ctx: &RequestContext, mut input: NewPart) -> LedgerResult<Part> {
        authorize(ctx, Capability::ManageCatalog)?;
        let mut uow = self.store.begin()?;
        if let Some(loc) = input.settings.default_location_id {
            require_location(uow.as_mut(), ctx.tenant_id, loc)?;
        }
        if input.site_id.is_none() {
            input.site_id = ctx.site_id;
        }
        let part = Part::register(ctx.tenant_id, PartId::generate(), input, Utc::now())?;
        uow.put_part(&part)?;
        uow.commit()?;

        info!(part = %part.id, name = %part.name, "part registered");
        self.audit(ctx, "part.registered", "Part", part.id, json!({ "name": part.name }));
        Ok(part)
    }

    #[instrument(skip(self, ctx, settings), fields(tenant = %ctx.tenant_id, part = %part_id), err)]
    pub fn update_reorder_settings(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        settings: ReorderSettings,
    ) -> LedgerResult<Part> {
        authorize(ctx, Capability::ManageCatalog)?;
        let mut uow = self.store.begin()?;
        let mut part = require_part(uow.as_mut(), ctx.tenant_id, part_id)?;
        if let Some(loc) = settings.default_location_id {
            require_location(uow.as_mut(), ctx.tenant_id, loc)?;
        }
        let before = json!({
            "reorderPoint": part.reorder_point,
            "minLevel": part.min_level,
            "reorderQty": part.reorder_qty,
            "autoReorder": part.auto_reorder,
        });
        part.apply_settings(settings, Utc::now())?;
        uow.put_part(&part)?;
        uow.commit()?;

        self.audit(
            ctx,
            "part.reorder_settings_updated",
            "Part",
            part.id,
            json!({
                "before": before,
                "after": {
                    "reorderPoint": part.reorder_point,
                    "minLevel": part.min_level,
                    "reorderQty": part.reorder_qty,
                    "autoReorder": part.auto_reorder,
                },
            }),
        );
        Ok(part)
    }

    #[instrument(skip(self, ctx, input), fields(tenant = %ctx.tenant_id), err)]
    pub fn create_location(
        &self,
        ctx: &RequestContext,
        mut input: NewLocation,
    ) -> LedgerResult<Location> {
        authorize(ctx, Capability::ManageCatalog)?;
        let mut uow = self.store.begin()?;
        if let Some(parent_id) = input.parent_id {
            let parent = require_location(uow.as_mut(), ctx.tenant_id, parent_id)?;
            if input.site_id.is_none() {
                input.site_id = parent.site_id;
            }
        }
        if input.site_id.is_none() {
            input.site_id = ctx.site_id;
        }
        let location = Location::create(ctx.tenant_id, LocationId::generate(), input, Utc::now())?;
        uow.put_location(&location)?;
        uow.commit()?;

        self.audit(
            ctx,
            "location.created",
            "Location",
            location.id,
            json!({ "name": location.name, "parentId": location.parent_id }),
        );
        Ok(location)
    }

    pub fn update_location_details(
        &self,
        ctx: &RequestContext,
        location_id: LocationId,
        details: LocationDetails,
    ) -> LedgerResult<Location> {
        authorize(ctx, Capability::ManageCatalog)?;
        if details.name.trim().is_empty() {
            return Err(DomainError::invalid_input("location name cannot be empty").into());
        }
        let mut uow = self.store.begin()?;
        let mut location = require_location(uow.as_mut(), ctx.tenant_id, location_id)?;
        location.name = details.name.trim().to_string();
        location.code = details.code;
        location.description = details.description;
        location.updated_at = Utc::now();
        uow.put_location(&location)?;
        uow.commit()?;

        self.audit(ctx, "location.updated", "Location", location.id, json!({ "name": location.name }));
        Ok(location)
    }

    /// Re-parent a location. `None` makes it a root.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, location = %location_id), err)]
    pub fn move_location(
        &self,
        ctx: &RequestContext,
        location_id: LocationId,
        new_parent: Option<LocationId>,
    ) -> LedgerResult<Location> {
        authorize(ctx, Capability::ManageCatalog)?;
        let mut uow = self.store.begin()?;
        let mut location = require_location(uow.as_mut(), ctx.tenant_id, location_id)?;
        if let Some(parent_id) = new_parent {
            require_location(uow.as_mut(), ctx.tenant_id, parent_id)?;
        }

        let parents: HashMap<LocationId, Option<LocationId>> = uow
            .list_locations(ctx.tenant_id)?
            .into_iter()
            .map(|l| (l.id, l.parent_id))
            .collect();
        ensure_acyclic(location_id, new_parent, |id| parents.get(&id).copied().flatten())?;

        let previous = location.parent_id;
        location.parent_id = new_parent;
        location.updated_at = Utc::now();
        uow.put_location(&location)?;
        uow.commit()?;

        self.audit(
            ctx,
            "location.moved",
            "Location",
            location.id,
            json!({ "from": previous, "to": new_parent }),
        );
        Ok(location)
    }

    /// Soft-deactivate. Refused while any part is stocked there.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, location = %location_id), err)]
    pub fn deactivate_location(
        &self,
        ctx: &RequestContext,
        location_id: LocationId,
    ) -> LedgerResult<Location> {
        authorize(ctx, Capability::ManageCatalog)?;
        let mut uow = self.store.begin()?;
        let mut location = require_location(uow.as_mut(), ctx.tenant_id, location_id)?;
        let stocked = uow
            .list_stock_items(ctx.tenant_id, None)?
            .into_iter()
            .filter(|i| i.location_id == location_id)
            .map(|i| i.quantity)
            .sum::<i64>();
        if stocked != 0 {
            return Err(DomainError::invalid_input(format!(
                "location {} still holds {stocked} units",
                location.label()
            ))
            .into());
        }
        if !location.active {
            return Ok(location);
        }
        location.active = false;
        location.updated_at = Utc::now();
        uow.put_location(&location)?;
        uow.commit()?;

        self.audit(ctx, "location.deactivated", "Location", location.id, json!({}));
        Ok(location)
    }

    /// Per-location threshold for the alert scan; `None` removes the override.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, part = %part_id, location = %location_id), err)]
    pub fn set_threshold_override(
        &self,
        ctx: &RequestContext,
        part_id: PartId,
        location_id: LocationId,
        threshold: Option<i64>,
    ) -> LedgerResult<Option<ThresholdOverride>> {
        authorize(ctx, Capability::ManageCatalog)?;
        if threshold.is_some_and(|t| t < 0) {
            return Err(DomainError::invalid_input("threshold cannot be negative").into());
        }
        let mut uow = self.store.begin()?;
        require_part(uow.as_mut(), ctx.tenant_id, part_id)?;
        require_location(uow.as_mut(), ctx.tenant_id, location_id)?;

        let result = match threshold {
            Some(threshold) => {
                let value = ThresholdOverride {
                    tenant_id: ctx.tenant_id,
                    part_id,
                    location_id,
                    threshold,
                    updated_at: Utc::now(),
                };
                uow.put_threshold_override(&value)?;
                Some(value)
            }
            None => {
                uow.delete_threshold_override(ctx.tenant_id, part_id, location_id)?;
                None
            }
        };
        uow.commit()?;

        self.audit(
            ctx,
            "part.threshold_override_set",
            "Part",
            part_id,
            json!({ "locationId": location_id, "threshold": threshold }),
        );
        Ok(result)
    }

    pub fn list_parts(&self, ctx: &RequestContext) -> LedgerResult<Vec<Part>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.list_parts(ctx.tenant_id)?)
    }

    pub fn list_locations(&self, ctx: &RequestContext) -> LedgerResult<Vec<Location>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.list_locations(ctx.tenant_id)?)
    }

    fn audit(
        &self,
        ctx: &RequestContext,
        action: &str,
        entity_type: &'static str,
        entity_id: impl ToString,
        metadata: serde_json::Value,
    ) {
        let entry = AuditEntry::new(ctx.tenant_id, action, entity_type, entity_id, ctx.user_id)
            .with_metadata(metadata);
        audit::record(self.audit.as_ref(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use cmms_auth::Role;
    use cmms_core::ErrorCategory;

    fn catalog(fx: &Fixture) -> CatalogService {
        CatalogService::new(fx.dyn_store(), fx.audit.clone())
    }

    #[test]
    fn registered_part_starts_at_zero() {
        let fx = Fixture::new();
        let part = catalog(&fx)
            .register_part(
                &fx.ctx,
                NewPart {
                    name: "  Pump seal ".to_string(),
                    ..NewPart::default()
                },
            )
            .unwrap();
        assert_eq!(part.quantity, 0);
        assert_eq!(part.name, "Pump seal");
        assert_eq!(fx.audit.actions(), vec!["part.registered".to_string()]);
    }

    #[test]
    fn clerk_cannot_edit_catalog() {
        let fx = Fixture::new();
        let err = catalog(&fx)
            .register_part(&fx.ctx_with(Role::Clerk), NewPart::default())
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }

    #[test]
    fn negative_reorder_settings_are_rejected() {
        let fx = Fixture::new();
        let part = fx.part("Gasket");
        let err = catalog(&fx)
            .update_reorder_settings(
                &fx.ctx,
                part,
                ReorderSettings {
                    reorder_point: -1,
                    ..ReorderSettings::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    #[test]
    fn moving_a_location_under_its_descendant_is_rejected() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let root = svc
            .create_location(&fx.ctx, NewLocation { name: "Store".into(), ..NewLocation::default() })
            .unwrap();
        let shelf = svc
            .create_location(
                &fx.ctx,
                NewLocation {
                    name: "Shelf".into(),
                    parent_id: Some(root.id),
                    ..NewLocation::default()
                },
            )
            .unwrap();

        let err = svc.move_location(&fx.ctx, root.id, Some(shelf.id)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);

        let moved = svc.move_location(&fx.ctx, shelf.id, None).unwrap();
        assert_eq!(moved.parent_id, None);
    }

    #[test]
    fn parent_must_exist_in_tenant() {
        let fx = Fixture::new();
        let err = catalog(&fx)
            .create_location(
                &fx.ctx,
                NewLocation {
                    name: "Orphan".into(),
                    parent_id: Some(LocationId::generate()),
                    ..NewLocation::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn stocked_location_cannot_be_deactivated() {
        let fx = Fixture::new();
        let (part, loc) = (fx.part("Gasket"), fx.location("B-02"));
        fx.seed(part, loc, 1);
        let svc = catalog(&fx);
        assert!(svc.deactivate_location(&fx.ctx, loc).is_err());

        fx.ledger
            .issue(&fx.ctx, part, loc, 1, &fx.key("drain"), Default::default())
            .unwrap();
        let loc_after = svc.deactivate_location(&fx.ctx, loc).unwrap();
        assert!(!loc_after.active);

        let err = fx
            .ledger
            .receive(&fx.ctx, part, loc, 1, &fx.key("refill"), Default::default())
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    #[test]
    fn threshold_override_can_be_set_and_cleared() {
        let fx = Fixture::new();
        let (part, loc) = (fx.part("Gasket"), fx.location("B-02"));
        let svc = catalog(&fx);
        assert!(svc.set_threshold_override(&fx.ctx, part, loc, Some(7)).unwrap().is_some());
        assert!(svc.set_threshold_override(&fx.ctx, part, loc, Some(-1)).is_err());
        assert!(svc.set_threshold_override(&fx.ctx, part, loc, None).unwrap().is_none());

        let mut uow = fx.store.begin().unwrap();
        assert!(uow.list_threshold_overrides(fx.tenant).unwrap().is_empty());
    }
}
