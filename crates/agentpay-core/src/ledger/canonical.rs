//! Canonical cross-rail ledger: the rail-agnostic journey state machine and idempotent
//! event ingestion (spec.md §3, §4.6). Grounded on the teacher's
//! `aggregation.rs::NormalizedTransaction` shape (provider-agnostic normalization), adapted
//! to a transitioning state machine rather than a flat record.

use crate::ids::{derive_journey_id, JourneyId, OrgId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalState {
    Created,
    Submitted,
    Processing,
    Settled,
    Returned,
    Failed,
}

impl CanonicalState {
    fn rank(&self) -> u8 {
        match self {
            CanonicalState::Created => 0,
            CanonicalState::Submitted => 1,
            CanonicalState::Processing => 2,
            CanonicalState::Settled => 3,
            // terminal leaves sit off the main path; treated as maximal so any transition
            // into them is always "forward", but a transition out of them is rejected by
            // `is_terminal` below rather than by rank.
            CanonicalState::Returned => 4,
            CanonicalState::Failed => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalState::Returned | CanonicalState::Failed)
    }

    /// The DAG of spec.md §4.6: created → submitted → processing → settled, with terminal
    /// leaves reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: CanonicalState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakStatus {
    Ok,
    DriftOpen,
    ReviewOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalJourney {
    pub journey_id: JourneyId,
    pub organization_id: OrgId,
    pub rail: String,
    pub provider: String,
    pub external_reference: String,
    pub canonical_state: CanonicalState,
    pub expected_amount_minor: Option<i64>,
    pub settled_amount_minor: Option<i64>,
    pub retry_count: u32,
    pub last_return_code: Option<String>,
    pub break_status: BreakStatus,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalJourney {
    pub fn new(organization_id: OrgId, rail: String, provider: String, external_reference: String) -> Self {
        let journey_id = derive_journey_id(&organization_id, &rail, &external_reference);
        let now = Utc::now();
        Self {
            journey_id,
            organization_id,
            rail,
            provider,
            external_reference,
            canonical_state: CanonicalState::Created,
            expected_amount_minor: None,
            settled_amount_minor: None,
            retry_count: 0,
            last_return_code: None,
            break_status: BreakStatus::Ok,
            last_event_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub journey_id: JourneyId,
    pub provider: String,
    pub provider_event_id: Option<String>,
    pub canonical_event_type: String,
    pub canonical_state: CanonicalState,
    pub event_ts: DateTime<Utc>,
    pub amount_minor: Option<i64>,
    pub return_code: Option<String>,
    pub out_of_order: bool,
    pub raw_payload: serde_json::Value,
}

/// Outcome of `ingest_event`: the updated journey plus any side effects that the caller
/// (treasury ingestion, chain-event webhook handler) must persist alongside it.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub journey: CanonicalJourney,
    pub duplicate: bool,
    pub drift_break: Option<crate::ledger::reconcile::ReconciliationBreak>,
    pub manual_review: Option<crate::ledger::reconcile::ManualReviewItem>,
    pub retry_exhausted_review: Option<crate::ledger::reconcile::ManualReviewItem>,
}

pub struct IngestParams<'a> {
    pub org_id: &'a OrgId,
    pub rail: &'a str,
    pub provider: &'a str,
    pub external_reference: &'a str,
    pub provider_event_id: Option<&'a str>,
    pub canonical_event_type: &'a str,
    pub canonical_state: CanonicalState,
    pub event_ts: DateTime<Utc>,
    pub amount_minor: Option<i64>,
    pub return_code: Option<&'a str>,
    pub raw_payload: serde_json::Value,
    pub drift_tolerance_minor: i64,
    pub max_retry: u32,
}

/// Applies one event to `journey` per the rules of spec.md §4.6. `seen_provider_event`
/// reports whether `(provider, provider_event_id)` has already been ingested — callers must
/// check this against their event repository before calling `ingest_event` so step 1 can
/// short-circuit without mutating anything.
pub fn ingest_event(mut journey: CanonicalJourney, params: IngestParams<'_>) -> IngestOutcome {
    let mut out_of_order = false;

    if journey.canonical_state.can_transition_to(params.canonical_state) {
        journey.canonical_state = params.canonical_state;
        journey.last_event_at = Some(params.event_ts);
    } else {
        // Backward transitions are rejected silently but flagged; the journey keeps its
        // later state and later last_event_at (spec.md §4.6 step 3).
        out_of_order = true;
        if let Some(last) = journey.last_event_at {
            if params.event_ts > last {
                journey.last_event_at = Some(params.event_ts);
            }
        } else {
            journey.last_event_at = Some(params.event_ts);
        }
    }

    if journey.expected_amount_minor.is_none() {
        journey.expected_amount_minor = params.amount_minor;
    }
    if params.canonical_state == CanonicalState::Settled && !out_of_order {
        journey.settled_amount_minor = params.amount_minor;
    }

    let mut drift_break = None;
    let mut manual_review = None;
    if params.canonical_state == CanonicalState::Settled && !out_of_order {
        if let (Some(expected), Some(settled)) = (journey.expected_amount_minor, journey.settled_amount_minor) {
            let delta = (expected - settled).abs();
            if delta > params.drift_tolerance_minor {
                let severity = if delta > std::cmp::max(1000, 5 * params.drift_tolerance_minor) {
                    crate::ledger::reconcile::BreakSeverity::High
                } else {
                    crate::ledger::reconcile::BreakSeverity::Medium
                };
                if journey.break_status != BreakStatus::DriftOpen {
                    journey.break_status = BreakStatus::DriftOpen;
                    drift_break = Some(crate::ledger::reconcile::ReconciliationBreak::new(
                        journey.journey_id.clone(),
                        "amount_drift".to_string(),
                        severity,
                        expected,
                        settled,
                    ));
                    manual_review = Some(crate::ledger::reconcile::ManualReviewItem::new(
                        Some(journey.journey_id.clone()),
                        "drift_mismatch".to_string(),
                        severity.review_priority(),
                        serde_json::json!({"expected_amount_minor": expected, "settled_amount_minor": settled}),
                    ));
                }
            }
        }
    }

    let mut retry_exhausted_review = None;
    if let Some(code) = params.return_code {
        match code {
            "R29" => {
                journey.break_status = BreakStatus::ReviewOpen;
                drift_break.get_or_insert_with(|| {
                    crate::ledger::reconcile::ReconciliationBreak::new(
                        journey.journey_id.clone(),
                        "return_code_r29".to_string(),
                        crate::ledger::reconcile::BreakSeverity::Critical,
                        journey.expected_amount_minor.unwrap_or(0),
                        journey.settled_amount_minor.unwrap_or(0),
                    )
                });
                manual_review.get_or_insert_with(|| {
                    crate::ledger::reconcile::ManualReviewItem::new(
                        Some(journey.journey_id.clone()),
                        "return_code_r29".to_string(),
                        0,
                        serde_json::json!({"return_code": code}),
                    )
                });
            }
            "R01" | "R09" => {
                journey.retry_count += 1;
                if journey.retry_count > params.max_retry {
                    retry_exhausted_review = Some(crate::ledger::reconcile::ManualReviewItem::new(
                        Some(journey.journey_id.clone()),
                        "retry_exhausted".to_string(),
                        1,
                        serde_json::json!({"retry_count": journey.retry_count, "return_code": code}),
                    ));
                }
            }
            _ => {}
        }
        journey.last_return_code = Some(code.to_string());
    }

    journey.updated_at = Utc::now();

    IngestOutcome { journey, duplicate: false, drift_break, manual_review, retry_exhausted_review }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_journey() -> CanonicalJourney {
        CanonicalJourney::new(OrgId::from_raw("org_1"), "ach".into(), "lithic".into(), "ref-1".into())
    }

    fn params(state: CanonicalState, amount: i64, tolerance: i64) -> IngestParams<'static> {
        IngestParams {
            org_id: Box::leak(Box::new(OrgId::from_raw("org_1"))),
            rail: "ach",
            provider: "lithic",
            external_reference: "ref-1",
            provider_event_id: None,
            canonical_event_type: "test",
            canonical_state: state,
            event_ts: Utc::now(),
            amount_minor: Some(amount),
            return_code: None,
            raw_payload: serde_json::json!({}),
            drift_tolerance_minor: tolerance,
            max_retry: 3,
        }
    }

    #[test]
    fn happy_path_reaches_settled_with_no_drift() {
        let journey = base_journey();
        let outcome = ingest_event(journey, params(CanonicalState::Created, 1000, 0));
        let outcome = ingest_event(outcome.journey, params(CanonicalState::Submitted, 1000, 0));
        let outcome = ingest_event(outcome.journey, params(CanonicalState::Settled, 1000, 0));
        assert_eq!(outcome.journey.canonical_state, CanonicalState::Settled);
        assert!(outcome.drift_break.is_none());
        assert_eq!(outcome.journey.settled_amount_minor, Some(1000));
    }

    #[test]
    fn drift_opens_medium_severity_break_and_review() {
        let journey = base_journey();
        let outcome = ingest_event(journey, params(CanonicalState::Created, 1000, 0));
        let outcome = ingest_event(outcome.journey, params(CanonicalState::Settled, 1250, 0));
        let drift = outcome.drift_break.expect("expected a drift break");
        assert_eq!(drift.severity, crate::ledger::reconcile::BreakSeverity::Medium);
        assert!(outcome.manual_review.is_some());
    }

    #[test]
    fn backward_transition_is_flagged_and_ignored() {
        let journey = base_journey();
        let outcome = ingest_event(journey, params(CanonicalState::Settled, 1000, 0));
        assert_eq!(outcome.journey.canonical_state, CanonicalState::Settled);
        let outcome2 = ingest_event(outcome.journey, params(CanonicalState::Submitted, 1000, 0));
        assert_eq!(outcome2.journey.canonical_state, CanonicalState::Settled);
    }

    #[test]
    fn terminal_state_is_not_left() {
        let journey = base_journey();
        let outcome = ingest_event(journey, params(CanonicalState::Failed, 0, 0));
        assert!(outcome.journey.canonical_state.is_terminal());
        let outcome2 = ingest_event(outcome.journey, params(CanonicalState::Settled, 500, 0));
        assert_eq!(outcome2.journey.canonical_state, CanonicalState::Failed);
    }
}
