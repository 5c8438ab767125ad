//! Per-transaction risk scoring (spec.md §4.2), grounded on the teacher's
//! `ibank-core/src/policy.rs::RiskPolicyEngine` 0-100 scale and action-bucket shape.

use super::drift::{DriftAlert, DriftSeverity};
use super::scorer::{TrustScore, TrustTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskAction {
    Approve,
    Review,
    EnhancedDueDiligence,
    Block,
    Escalate,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u8,
    pub action: RiskAction,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskInputs {
    pub sanctions_hit: bool,
    pub amount_exceeds_tier_limit: bool,
    pub is_first_transaction_with_counterparty: bool,
    pub active_drift_alerts: Vec<DriftAlert>,
}

/// Computes a 0-100 risk score (spec.md §4.2): a sanctions hit hard-pins the score to 100
/// with a mandatory BLOCK, independent of every other input. Otherwise the score is a sum of
/// weighted penalties capped at 100, mapped to an action bucket.
pub fn assess_risk(trust: &TrustScore, inputs: &RiskInputs) -> RiskAssessment {
    let mut reasons = Vec::new();

    if inputs.sanctions_hit {
        return RiskAssessment {
            score: 100,
            action: RiskAction::Block,
            reasons: vec!["sanctions_or_aml_hit".to_string()],
        };
    }

    let mut score: u32 = 0;

    let tier_penalty = match trust.tier {
        TrustTier::Untrusted => 40,
        TrustTier::Low => 25,
        TrustTier::Medium => 10,
        TrustTier::High => 3,
        TrustTier::Sovereign => 0,
    };
    if tier_penalty > 0 {
        reasons.push(format!("trust_tier:{:?}", trust.tier));
    }
    score += tier_penalty;

    if inputs.amount_exceeds_tier_limit {
        score += 30;
        reasons.push("amount_exceeds_tier_limit".to_string());
    }

    if inputs.is_first_transaction_with_counterparty {
        score += 10;
        reasons.push("first_transaction_with_counterparty".to_string());
    }

    for alert in &inputs.active_drift_alerts {
        let penalty = match alert.severity {
            DriftSeverity::Low => 3,
            DriftSeverity::Medium => 10,
            DriftSeverity::High => 20,
            DriftSeverity::Critical => 35,
        };
        score += penalty;
        reasons.push(format!("drift:{:?}:{:?}", alert.drift_type, alert.severity));
    }

    let score = score.min(100) as u8;
    let action = if score >= 85 {
        RiskAction::Block
    } else if score >= 60 {
        RiskAction::Escalate
    } else if score >= 40 {
        RiskAction::EnhancedDueDiligence
    } else if score >= 20 {
        RiskAction::Review
    } else {
        RiskAction::Approve
    };

    RiskAssessment { score, action, reasons }
}

#[cfg(test)]
mod tests {
    use super::super::drift::DriftType;
    use super::*;

    fn score(tier: TrustTier) -> TrustScore {
        let s = match tier {
            TrustTier::Untrusted => 0.1,
            TrustTier::Low => 0.35,
            TrustTier::Medium => 0.55,
            TrustTier::High => 0.75,
            TrustTier::Sovereign => 0.95,
        };
        TrustScore { score: s, tier }
    }

    #[test]
    fn sanctions_hit_always_blocks_at_max_score() {
        let inputs = RiskInputs { sanctions_hit: true, ..Default::default() };
        let assessment = assess_risk(&score(TrustTier::Sovereign), &inputs);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.action, RiskAction::Block);
    }

    #[test]
    fn sovereign_tier_clean_transaction_is_approved() {
        let inputs = RiskInputs::default();
        let assessment = assess_risk(&score(TrustTier::Sovereign), &inputs);
        assert_eq!(assessment.action, RiskAction::Approve);
    }

    #[test]
    fn untrusted_tier_with_drift_escalates_or_blocks() {
        let inputs = RiskInputs {
            amount_exceeds_tier_limit: true,
            active_drift_alerts: vec![DriftAlert {
                drift_type: DriftType::AmountAnomaly,
                severity: DriftSeverity::Critical,
                confidence: 0.99,
                detail: "test".into(),
            }],
            ..Default::default()
        };
        let assessment = assess_risk(&score(TrustTier::Untrusted), &inputs);
        assert!(assessment.action >= RiskAction::Escalate);
    }
}
