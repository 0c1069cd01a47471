//! Manual review of scan output: listing, approving and skipping alerts,
//! dismissing suggestions.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument};

use cmms_auth::{authorize, Capability, RequestContext};
use cmms_core::DomainError;
use cmms_inventory::{AlertId, AlertStatus, ReorderAlert, ReorderSuggestion, SuggestionId};

use crate::audit::{self, AuditEntry, AuditSink};
use crate::error::LedgerResult;
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct ReorderReview {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
}

impl ReorderReview {
    pub fn new(store: Arc<dyn LedgerStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub fn list_alerts(
        &self,
        ctx: &RequestContext,
        status: Option<AlertStatus>,
    ) -> LedgerResult<Vec<ReorderAlert>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.list_alerts(ctx.tenant_id, status)?)
    }

    pub fn list_suggestions(&self, ctx: &RequestContext) -> LedgerResult<Vec<ReorderSuggestion>> {
        authorize(ctx, Capability::ViewInventory)?;
        let mut uow = self.store.begin()?;
        Ok(uow.list_suggestions(ctx.tenant_id)?)
    }

    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, alert = %alert_id), err)]
    pub fn approve_alert(&self, ctx: &RequestContext, alert_id: AlertId) -> LedgerResult<ReorderAlert> {
        self.transition_alert(ctx, alert_id, AlertStatus::Approved)
    }

    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, alert = %alert_id), err)]
    pub fn skip_alert(&self, ctx: &RequestContext, alert_id: AlertId) -> LedgerResult<ReorderAlert> {
        self.transition_alert(ctx, alert_id, AlertStatus::Skipped)
    }

    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant_id, suggestion = %suggestion_id), err)]
    pub fn dismiss_suggestion(
        &self,
        ctx: &RequestContext,
        suggestion_id: SuggestionId,
    ) -> LedgerResult<ReorderSuggestion> {
        authorize(ctx, Capability::ManageReorders)?;
        let mut uow = self.store.begin()?;
        let mut suggestion = uow
            .get_suggestion(ctx.tenant_id, suggestion_id)?
            .ok_or_else(|| DomainError::not_found("reorder suggestion", suggestion_id))?;
        suggestion.dismiss(Utc::now())?;
        uow.put_suggestion(&suggestion)?;
        uow.commit()?;

        info!(part = %suggestion.part_id, "suggestion dismissed");
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(
                ctx.tenant_id,
                "reorder_suggestion.dismissed",
                "ReorderSuggestion",
                suggestion.id,
                ctx.user_id,
            )
            .with_metadata(json!({
                "partId": suggestion.part_id,
                "runId": suggestion.source.run_id,
            })),
        );
        Ok(suggestion)
    }

    fn transition_alert(
        &self,
        ctx: &RequestContext,
        alert_id: AlertId,
        to: AlertStatus,
    ) -> LedgerResult<ReorderAlert> {
        authorize(ctx, Capability::ManageReorders)?;
        let mut uow = self.store.begin()?;
        let mut alert = uow
            .get_alert(ctx.tenant_id, alert_id)?
            .ok_or_else(|| DomainError::not_found("reorder alert", alert_id))?;
        alert.transition(to, Utc::now())?;
        uow.put_alert(&alert)?;
        uow.commit()?;

        info!(part = %alert.part_id, status = %alert.status, "alert reviewed");
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(
                ctx.tenant_id,
                format!("reorder_alert.{to}"),
                "ReorderAlert",
                alert.id,
                ctx.user_id,
            )
            .with_metadata(json!({
                "partId": alert.part_id,
                "locationId": alert.location_id,
                "quantity": alert.quantity,
                "threshold": alert.threshold,
            })),
        );
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::InMemoryNotificationSink;
    use crate::reorder::{AlertScanner, LocalRunGuard, SuggestionScanner};
    use crate::test_support::Fixture;
    use cmms_auth::Role;
    use cmms_core::ErrorCategory;
    use cmms_inventory::{ReorderSettings, SuggestionCriteria, SuggestionStatus};

    fn review(fx: &Fixture) -> ReorderReview {
        ReorderReview::new(fx.dyn_store(), fx.audit.clone())
    }

    fn scan_alerts(fx: &Fixture) {
        AlertScanner::new(
            fx.dyn_store(),
            Arc::new(InMemoryNotificationSink::new()),
            Arc::new(LocalRunGuard::new()),
        )
        .run()
        .unwrap();
    }

    fn low_part(fx: &Fixture) -> cmms_inventory::PartId {
        let part = fx.part_with(
            "Relay",
            ReorderSettings {
                reorder_point: 5,
                ..ReorderSettings::default()
            },
        );
        let bin = fx.location("R1");
        fx.seed(part, bin, 1);
        part
    }

    #[test]
    fn approved_alert_is_not_reopened_while_the_condition_holds() {
        let fx = Fixture::new();
        low_part(&fx);
        scan_alerts(&fx);
        let review = review(&fx);
        let manager = fx.ctx_with(Role::Manager);

        let open = review.list_alerts(&manager, Some(AlertStatus::Open)).unwrap();
        assert_eq!(open.len(), 1);
        let approved = review.approve_alert(&manager, open[0].id).unwrap();
        assert_eq!(approved.status, AlertStatus::Approved);

        scan_alerts(&fx);
        let all = review.list_alerts(&manager, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, AlertStatus::Approved);
        assert!(fx.audit.actions().contains(&"reorder_alert.approved".to_string()));
    }

    #[test]
    fn resolved_alert_cannot_be_skipped() {
        let fx = Fixture::new();
        let part = low_part(&fx);
        scan_alerts(&fx);
        fx.edit_part(part, |p| p.reorder_point = 0);
        scan_alerts(&fx);

        let manager = fx.ctx_with(Role::Manager);
        let review = review(&fx);
        let resolved = review.list_alerts(&manager, Some(AlertStatus::Resolved)).unwrap();
        let err = review.skip_alert(&manager, resolved[0].id).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unprocessable);
    }

    #[test]
    fn reviewing_needs_manager_tier() {
        let fx = Fixture::new();
        low_part(&fx);
        scan_alerts(&fx);
        let review = review(&fx);
        let alert = review
            .list_alerts(&fx.ctx_with(Role::Viewer), None)
            .unwrap()
            .remove(0);
        let err = review
            .approve_alert(&fx.ctx_with(Role::Supervisor), alert.id)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Forbidden);
    }

    #[test]
    fn dismiss_then_dismiss_again_is_rejected() {
        let fx = Fixture::new();
        low_part(&fx);
        SuggestionScanner::new(
            fx.dyn_store(),
            Arc::new(LocalRunGuard::new()),
            SuggestionCriteria::default(),
        )
        .run()
        .unwrap();
        let manager = fx.ctx_with(Role::Manager);
        let review = review(&fx);
        let suggestion = review.list_suggestions(&manager).unwrap().remove(0);

        let dismissed = review.dismiss_suggestion(&manager, suggestion.id).unwrap();
        assert_eq!(dismissed.status, SuggestionStatus::Dismissed);
        assert!(review.dismiss_suggestion(&manager, suggestion.id).is_err());
    }

    #[test]
    fn unknown_alert_is_not_found() {
        let fx = Fixture::new();
        let err = review(&fx)
            .approve_alert(&fx.ctx_with(Role::Admin), AlertId::generate())
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
