//! Reconciliation breaks and the manual-review queue (spec.md §3, §4.6 step 5-6).

use crate::ids::JourneyId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BreakSeverity {
    /// Lower number sorts first in the manual-review queue; critical items are handled
    /// before routine drift.
    pub fn review_priority(&self) -> u8 {
        match self {
            BreakSeverity::Critical => 0,
            BreakSeverity::High => 1,
            BreakSeverity::Medium => 2,
            BreakSeverity::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakRecordStatus {
    Open,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationBreak {
    pub break_id: String,
    pub journey_id: JourneyId,
    pub break_type: String,
    pub severity: BreakSeverity,
    pub expected_amount_minor: i64,
    pub settled_amount_minor: i64,
    pub delta_minor: i64,
    pub status: BreakRecordStatus,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationBreak {
    pub fn new(
        journey_id: JourneyId,
        break_type: String,
        severity: BreakSeverity,
        expected_amount_minor: i64,
        settled_amount_minor: i64,
    ) -> Self {
        Self {
            break_id: format!("break_{}", Uuid::new_v4().simple()),
            journey_id,
            break_type,
            severity,
            expected_amount_minor,
            settled_amount_minor,
            delta_minor: (expected_amount_minor - settled_amount_minor).abs(),
            status: BreakRecordStatus::Open,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Queued,
    InReview,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualReviewItem {
    pub review_id: String,
    pub journey_id: Option<JourneyId>,
    pub reason_code: String,
    pub priority: u8,
    pub status: ReviewStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ManualReviewItem {
    pub fn new(journey_id: Option<JourneyId>, reason_code: String, priority: u8, payload: serde_json::Value) -> Self {
        Self {
            review_id: format!("review_{}", Uuid::new_v4().simple()),
            journey_id,
            reason_code,
            priority,
            status: ReviewStatus::Queued,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Deduplicates breaks/reviews by `(type, journey)`: at most one open entry of each kind
/// per journey (spec.md §4.6 step 5).
pub struct ReconciliationLedger {
    breaks: std::sync::Mutex<Vec<ReconciliationBreak>>,
    reviews: std::sync::Mutex<Vec<ManualReviewItem>>,
}

impl Default for ReconciliationLedger {
    fn default() -> Self {
        Self { breaks: std::sync::Mutex::new(Vec::new()), reviews: std::sync::Mutex::new(Vec::new()) }
    }
}

impl ReconciliationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_break_if_absent(&self, candidate: ReconciliationBreak) -> bool {
        let mut guard = self.breaks.lock().expect("reconciliation breaks mutex poisoned");
        let already_open = guard.iter().any(|b| {
            b.journey_id == candidate.journey_id
                && b.break_type == candidate.break_type
                && b.status == BreakRecordStatus::Open
        });
        if already_open {
            return false;
        }
        guard.push(candidate);
        true
    }

    pub fn record_review_if_absent(&self, candidate: ManualReviewItem) -> bool {
        let mut guard = self.reviews.lock().expect("manual review mutex poisoned");
        let already_queued = guard.iter().any(|r| {
            r.journey_id == candidate.journey_id
                && r.reason_code == candidate.reason_code
                && r.status == ReviewStatus::Queued
        });
        if already_queued {
            return false;
        }
        guard.push(candidate);
        true
    }

    pub fn open_breaks(&self) -> Vec<ReconciliationBreak> {
        self.breaks.lock().expect("reconciliation breaks mutex poisoned").clone()
    }

    pub fn queued_reviews(&self) -> Vec<ManualReviewItem> {
        let mut reviews = self.reviews.lock().expect("manual review mutex poisoned").clone();
        reviews.sort_by_key(|r| r.priority);
        reviews
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::JourneyId;

    #[test]
    fn duplicate_drift_breaks_are_deduplicated() {
        let ledger = ReconciliationLedger::new();
        let journey_id = JourneyId::from_raw("jrny_abc");
        let b1 = ReconciliationBreak::new(journey_id.clone(), "amount_drift".into(), BreakSeverity::Medium, 1000, 1250);
        let b2 = ReconciliationBreak::new(journey_id, "amount_drift".into(), BreakSeverity::Medium, 1000, 1250);
        assert!(ledger.record_break_if_absent(b1));
        assert!(!ledger.record_break_if_absent(b2));
        assert_eq!(ledger.open_breaks().len(), 1);
    }
}
