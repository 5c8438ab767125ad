//! Canonical cross-rail ledger (spec.md §4.6): journey state machine, event ingestion, and
//! reconciliation breaks/manual review.

pub mod canonical;
pub mod reconcile;

pub use canonical::{CanonicalEvent, CanonicalJourney, CanonicalState, IngestOutcome, IngestParams};
pub use reconcile::{BreakRecordStatus, BreakSeverity, ManualReviewItem, ReconciliationBreak, ReconciliationLedger, ReviewStatus};
