//! Reorder suggestions: point-in-time output of one suggestion scan run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cmms_core::{entity_id, DomainError, DomainResult, Entity, TenantId, TenantScoped};

use crate::location::LocationId;
use crate::part::{Part, PartId, VendorId};

entity_id!(
    /// Reorder suggestion identifier.
    SuggestionId
);

entity_id!(
    /// Groups everything one scan execution produced.
    RunId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Open,
    Dismissed,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Open => "open",
            SuggestionStatus::Dismissed => "dismissed",
        }
    }
}

impl core::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SuggestionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(SuggestionStatus::Open),
            "dismissed" => Ok(SuggestionStatus::Dismissed),
            other => Err(DomainError::invalid_input(format!(
                "unknown suggestion status '{other}'"
            ))),
        }
    }
}

/// What produced a suggestion. Suggestions are unique per `(tenant, part, type)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSourceType {
    ReorderScan,
}

impl SuggestionSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionSourceType::ReorderScan => "reorder_scan",
        }
    }
}

impl core::str::FromStr for SuggestionSourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reorder_scan" => Ok(SuggestionSourceType::ReorderScan),
            other => Err(DomainError::invalid_input(format!(
                "unknown suggestion source '{other}'"
            ))),
        }
    }
}

/// Tunables a run applied, recorded on every suggestion it produced.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionCriteria {
    /// Extra percentage added to the threshold of parts with a lead time.
    pub lead_time_buffer_pct: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionSource {
    #[serde(rename = "type")]
    pub kind: SuggestionSourceType,
    pub run_id: RunId,
    pub generated_at: DateTime<Utc>,
    pub criteria: SuggestionCriteria,
}

/// Numbers behind one suggestion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionFigures {
    pub suggested_qty: i64,
    pub on_hand: i64,
    pub on_order: i64,
    pub threshold: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderSuggestion {
    pub id: SuggestionId,
    pub tenant_id: TenantId,
    pub part_id: PartId,
    pub vendor_id: Option<VendorId>,
    pub location_id: Option<LocationId>,
    pub suggested_qty: i64,
    pub on_hand: i64,
    pub on_order: i64,
    pub threshold: i64,
    pub status: SuggestionStatus,
    pub source: SuggestionSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReorderSuggestion {
    pub fn new(
        part: &Part,
        figures: SuggestionFigures,
        source: SuggestionSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SuggestionId::generate(),
            tenant_id: part.tenant_id,
            part_id: part.id,
            vendor_id: part.vendor_id,
            location_id: part.default_location_id,
            suggested_qty: figures.suggested_qty,
            on_hand: figures.on_hand,
            on_order: figures.on_order,
            threshold: figures.threshold,
            status: SuggestionStatus::Open,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    /// Upsert path: same row, new run's figures. A dismissed row reopens.
    pub fn supersede(
        &mut self,
        part: &Part,
        figures: SuggestionFigures,
        source: SuggestionSource,
        now: DateTime<Utc>,
    ) {
        self.vendor_id = part.vendor_id;
        self.location_id = part.default_location_id;
        self.suggested_qty = figures.suggested_qty;
        self.on_hand = figures.on_hand;
        self.on_order = figures.on_order;
        self.threshold = figures.threshold;
        self.status = SuggestionStatus::Open;
        self.source = source;
        self.updated_at = now;
    }

    pub fn dismiss(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != SuggestionStatus::Open {
            return Err(DomainError::invalid_transition(
                self.status,
                SuggestionStatus::Dismissed,
            ));
        }
        self.status = SuggestionStatus::Dismissed;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_from_run(&self, run_id: RunId) -> bool {
        self.source.run_id == run_id
    }
}

impl Entity for ReorderSuggestion {
    type Id = SuggestionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TenantScoped for ReorderSuggestion {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Threshold plus the lead-time buffer, rounded up. Parts without a lead time
/// are not buffered.
pub fn buffered_threshold(threshold: i64, lead_time_days: u32, buffer_pct: u32) -> i64 {
    if lead_time_days == 0 || buffer_pct == 0 || threshold <= 0 {
        return threshold;
    }
    let extra = (threshold * i64::from(buffer_pct) + 99) / 100;
    threshold + extra
}

/// Decide whether `part` needs a suggestion given `on_order` open demand.
///
/// A part is covered when stock plus open orders exceeds the buffered threshold,
/// or when open orders already bring it up to that threshold.
pub fn evaluate_suggestion(
    part: &Part,
    on_order: i64,
    criteria: &SuggestionCriteria,
) -> Option<SuggestionFigures> {
    let threshold = part.reorder_threshold();
    if threshold <= 0 {
        return None;
    }
    let buffered = buffered_threshold(threshold, part.lead_time_days, criteria.lead_time_buffer_pct);
    let on_hand = part.quantity;
    let on_order = on_order.max(0);
    let projected = on_hand + on_order;
    if projected > buffered || (on_order > 0 && projected >= buffered) {
        return None;
    }
    Some(SuggestionFigures {
        suggested_qty: (part.reorder_quantity() - on_order).max(1),
        on_hand,
        on_order,
        threshold: buffered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::{NewPart, ReorderSettings};

    fn part(quantity: i64, reorder_point: i64, lead_time_days: u32) -> Part {
        let mut p = Part::register(
            TenantId::new(),
            PartId::generate(),
            NewPart {
                name: "V-belt".to_string(),
                settings: ReorderSettings {
                    reorder_point,
                    lead_time_days,
                    ..ReorderSettings::default()
                },
                ..NewPart::default()
            },
            Utc::now(),
        )
        .unwrap();
        p.quantity = quantity;
        p
    }

    #[test]
    fn open_order_covering_the_gap_suppresses_the_suggestion() {
        let p = part(3, 5, 0);
        let criteria = SuggestionCriteria::default();

        let figures = evaluate_suggestion(&p, 0, &criteria).unwrap();
        assert!(figures.suggested_qty >= 1);
        assert_eq!(figures.suggested_qty, 2);

        assert!(evaluate_suggestion(&p, 2, &criteria).is_none());
        assert!(evaluate_suggestion(&p, 10, &criteria).is_none());

        let partial = evaluate_suggestion(&p, 1, &criteria).unwrap();
        assert_eq!(partial.on_order, 1);
        assert_eq!(partial.suggested_qty, 1);
    }

    #[test]
    fn untracked_parts_never_get_suggestions() {
        assert!(evaluate_suggestion(&part(0, 0, 0), 0, &SuggestionCriteria::default()).is_none());
    }

    #[test]
    fn lead_time_buffer_rounds_up_and_only_applies_with_lead_time() {
        assert_eq!(buffered_threshold(5, 0, 50), 5);
        assert_eq!(buffered_threshold(5, 7, 50), 8);
        assert_eq!(buffered_threshold(10, 7, 0), 10);

        let criteria = SuggestionCriteria {
            lead_time_buffer_pct: 50,
        };
        let figures = evaluate_suggestion(&part(7, 5, 14), 0, &criteria).unwrap();
        assert_eq!(figures.threshold, 8);
    }

    #[test]
    fn dismissed_suggestions_reopen_when_superseded() {
        let p = part(1, 5, 0);
        let now = Utc::now();
        let figures = evaluate_suggestion(&p, 0, &SuggestionCriteria::default()).unwrap();
        let source = |run_id| SuggestionSource {
            kind: SuggestionSourceType::ReorderScan,
            run_id,
            generated_at: now,
            criteria: SuggestionCriteria::default(),
        };
        let mut s = ReorderSuggestion::new(&p, figures, source(RunId::generate()), now);
        s.dismiss(now).unwrap();
        assert!(s.dismiss(now).is_err());

        let next = RunId::generate();
        s.supersede(&p, figures, source(next), now);
        assert_eq!(s.status, SuggestionStatus::Open);
        assert!(s.is_from_run(next));

        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["source"]["type"], "reorder_scan");
        assert_eq!(v["source"]["criteria"]["leadTimeBufferPct"], 0);
    }
}
