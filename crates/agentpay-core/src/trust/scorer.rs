//! Behavioural trust scoring and tier derivation (spec.md §4.2).
//!
//! Grounded on the teacher's `ibank-core/src/policy.rs::RiskPolicyEngine` weighted-factor
//! scoring shape (deterministic, integer-friendly arithmetic), generalized from iBank's
//! single risk score to the five weighted trust signals and the tier table of spec.md §4.2.

use crate::ids::AgentId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Copy)]
pub struct TrustWeights {
    pub kya_level: f64,
    pub transaction_history: f64,
    pub compliance: f64,
    pub reputation: f64,
    pub behavioral_consistency: f64,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            kya_level: 0.30,
            transaction_history: 0.25,
            compliance: 0.20,
            reputation: 0.15,
            behavioral_consistency: 0.10,
        }
    }
}

impl TrustWeights {
    pub fn sum(&self) -> f64 {
        self.kya_level + self.transaction_history + self.compliance + self.reputation + self.behavioral_consistency
    }

    pub fn is_valid(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustTier {
    Untrusted,
    Low,
    Medium,
    High,
    Sovereign,
}

#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub max_per_tx_minor: i64,
    pub max_per_day_minor: i64,
}

impl TrustTier {
    /// Tier table of spec.md §4.2.
    pub fn from_score(score: f64) -> TrustTier {
        if score >= 0.90 {
            TrustTier::Sovereign
        } else if score >= 0.70 {
            TrustTier::High
        } else if score >= 0.50 {
            TrustTier::Medium
        } else if score >= 0.30 {
            TrustTier::Low
        } else {
            TrustTier::Untrusted
        }
    }

    pub fn limits(&self) -> TierLimits {
        match self {
            TrustTier::Untrusted => TierLimits { max_per_tx_minor: 1_000, max_per_day_minor: 2_500 },
            TrustTier::Low => TierLimits { max_per_tx_minor: 5_000, max_per_day_minor: 10_000 },
            TrustTier::Medium => TierLimits { max_per_tx_minor: 50_000, max_per_day_minor: 100_000 },
            TrustTier::High => TierLimits { max_per_tx_minor: 500_000, max_per_day_minor: 1_000_000 },
            TrustTier::Sovereign => TierLimits { max_per_tx_minor: 5_000_000, max_per_day_minor: 10_000_000 },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionHistorySignal {
    pub success_count: u64,
    pub failure_count: u64,
    pub total_volume_minor: i64,
    pub distinct_merchants: u32,
    pub account_age_days: u32,
    pub dispute_count: u64,
}

impl TransactionHistorySignal {
    /// Weighted combination: success rate (0.40), log-scaled volume (0.25), merchant
    /// diversity (0.20), age-in-days (0.15), with a dispute penalty multiplier
    /// `1 - 0.5 * dispute_ratio` (spec.md §4.2).
    pub fn sub_score(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        let success_rate = if total == 0 { 0.5 } else { self.success_count as f64 / total as f64 };
        let volume_score = (1.0 + self.total_volume_minor.max(0) as f64).ln() / (1.0 + 1_000_000_000f64).ln();
        let merchant_score = (self.distinct_merchants as f64 / 20.0).min(1.0);
        let age_score = (self.account_age_days as f64 / 365.0).min(1.0);

        let base = success_rate * 0.40 + volume_score.min(1.0) * 0.25 + merchant_score * 0.20 + age_score * 0.15;
        let dispute_ratio = if total == 0 { 0.0 } else { self.dispute_count as f64 / total as f64 };
        (base * (1.0 - 0.5 * dispute_ratio.min(1.0))).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComplianceSignal {
    pub sanctions_or_aml_hit: bool,
    pub days_since_last_violation: Option<u32>,
}

impl ComplianceSignal {
    /// 0 on any AML/sanctions hit or within 7 days of a violation (spec.md §4.2).
    pub fn sub_score(&self) -> f64 {
        if self.sanctions_or_aml_hit {
            return 0.0;
        }
        if let Some(days) = self.days_since_last_violation {
            if days < 7 {
                return 0.0;
            }
        }
        1.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReputationSignal {
    pub average_rating: f64,
    pub rating_count: u32,
}

impl ReputationSignal {
    /// Blends toward 0.5 with low confidence (`n < 50` ratings) (spec.md §4.2).
    pub fn sub_score(&self) -> f64 {
        let confidence = (self.rating_count as f64 / 50.0).min(1.0);
        let normalized = (self.average_rating / 5.0).clamp(0.0, 1.0);
        normalized * confidence + 0.5 * (1.0 - confidence)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BehavioralConsistencySignal {
    /// 0..1, typically fed by the drift detector's recent alert severity (1.0 = perfectly
    /// consistent, no active drift alerts).
    pub consistency: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrustSignals {
    pub kya_level_score: f64,
    pub transaction_history: TransactionHistorySignal,
    pub compliance: ComplianceSignal,
    pub reputation: ReputationSignal,
    pub behavioral_consistency: BehavioralConsistencySignal,
}

#[derive(Debug, Clone, Copy)]
pub struct TrustScore {
    pub score: f64,
    pub tier: TrustTier,
}

pub fn compute_trust_score(signals: &TrustSignals, weights: &TrustWeights) -> TrustScore {
    debug_assert!(weights.is_valid(), "trust weights must sum to 1.0 +/- 1e-2");
    let score = (signals.kya_level_score.clamp(0.0, 1.0) * weights.kya_level
        + signals.transaction_history.sub_score() * weights.transaction_history
        + signals.compliance.sub_score() * weights.compliance
        + signals.reputation.sub_score() * weights.reputation
        + signals.behavioral_consistency.consistency.clamp(0.0, 1.0) * weights.behavioral_consistency)
        .clamp(0.0, 1.0);
    TrustScore { score, tier: TrustTier::from_score(score) }
}

/// KYA-level component of the weighted score: NONE=0.0, BASIC=0.33, VERIFIED=0.66,
/// ATTESTED=1.0, an even split across the four levels.
pub fn kya_level_score(level: crate::trust::kya::KyaLevel) -> f64 {
    use crate::trust::kya::KyaLevel::*;
    match level {
        None => 0.0,
        Basic => 0.33,
        Verified => 0.66,
        Attested => 1.0,
    }
}

/// 5-minute TTL cache keyed by agent id, invalidated on any state change (spec.md §4.2).
#[derive(Default)]
pub struct TrustScoreCache {
    entries: std::sync::Mutex<HashMap<String, (DateTime<Utc>, TrustScore)>>,
}

impl TrustScoreCache {
    pub const TTL: StdDuration = StdDuration::from_secs(300);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<TrustScore> {
        let guard = self.entries.lock().expect("trust score cache mutex poisoned");
        guard.get(agent_id.as_str()).and_then(|(at, score)| {
            if Utc::now().signed_duration_since(*at).to_std().unwrap_or(Self::TTL) < Self::TTL {
                Some(*score)
            } else {
                None
            }
        })
    }

    pub fn put(&self, agent_id: &AgentId, score: TrustScore) {
        let mut guard = self.entries.lock().expect("trust score cache mutex poisoned");
        guard.insert(agent_id.as_str().to_string(), (Utc::now(), score));
    }

    pub fn invalidate(&self, agent_id: &AgentId) {
        let mut guard = self.entries.lock().expect("trust score cache mutex poisoned");
        guard.remove(agent_id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        assert!(TrustWeights::default().is_valid());
    }

    #[test]
    fn sovereign_tier_implies_high_score() {
        let signals = TrustSignals {
            kya_level_score: 1.0,
            transaction_history: TransactionHistorySignal {
                success_count: 1000,
                failure_count: 5,
                total_volume_minor: 5_000_000_000,
                distinct_merchants: 50,
                account_age_days: 900,
                dispute_count: 0,
            },
            compliance: ComplianceSignal { sanctions_or_aml_hit: false, days_since_last_violation: None },
            reputation: ReputationSignal { average_rating: 5.0, rating_count: 500 },
            behavioral_consistency: BehavioralConsistencySignal { consistency: 1.0 },
        };
        let result = compute_trust_score(&signals, &TrustWeights::default());
        assert!(result.score >= 0.9, "expected sovereign-tier score, got {}", result.score);
        assert_eq!(result.tier, TrustTier::Sovereign);
    }

    #[test]
    fn sanctions_hit_zeroes_compliance_and_caps_score() {
        let signals = TrustSignals {
            kya_level_score: 1.0,
            compliance: ComplianceSignal { sanctions_or_aml_hit: true, days_since_last_violation: None },
            ..Default::default()
        };
        let result = compute_trust_score(&signals, &TrustWeights::default());
        assert!(result.score < 0.9);
    }

    #[test]
    fn score_is_always_in_unit_interval() {
        let signals = TrustSignals::default();
        let result = compute_trust_score(&signals, &TrustWeights::default());
        assert!((0.0..=1.0).contains(&result.score));
    }
}
