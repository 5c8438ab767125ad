//! `evaluate_trust` (spec.md §4.2 "Evaluation contract"): composes KYA state, behavioural
//! scoring, drift detection, and velocity governance into the single call the payment
//! orchestrator makes before dispatching a mandate chain or escrow transfer to a rail.

use super::drift::DriftAlert;
use super::kya::KyaLevel;
use super::risk::{assess_risk, RiskAction, RiskInputs};
use super::scorer::{compute_trust_score, kya_level_score, TrustScore, TrustSignals, TrustTier, TrustWeights};
use super::velocity::VelocityGovernor;
use crate::ids::AgentId;
use chrono::{DateTime, Utc};

/// Everything `evaluate_trust` needs to know about one party to a transaction.
#[derive(Debug, Clone)]
pub struct PartyContext {
    pub agent_id: AgentId,
    pub kya_level: KyaLevel,
    pub signals: TrustSignals,
    pub sanctions_hit: bool,
    /// Active drift alerts for this agent, fed into the risk scorer.
    pub drift_alerts: Vec<DriftAlert>,
}

impl PartyContext {
    pub fn new(agent_id: AgentId, kya_level: KyaLevel) -> Self {
        Self {
            agent_id,
            kya_level,
            signals: TrustSignals { kya_level_score: kya_level_score(kya_level), ..TrustSignals::default() },
            sanctions_hit: false,
            drift_alerts: Vec::new(),
        }
    }
}

/// Result of a trust evaluation (spec.md §4.2): deterministic `denial_reason` strings are
/// part of the external contract and must match the taxonomy of spec.md §7.
#[derive(Debug, Clone)]
pub struct TrustEvaluation {
    pub approved: bool,
    pub trust_score: f64,
    pub requester_tier: TrustTier,
    pub counterparty_tier: Option<TrustTier>,
    pub denial_reason: Option<String>,
    pub warnings: Vec<String>,
}

/// Composes KYA, the weighted trust scorer, and the velocity governor into one decision
/// for `(requester, counterparty, amount, operation)` (spec.md §4.2).
///
/// When `counterparty` is present (agent-to-agent operations), the combined score is the
/// geometric mean of both parties' scores; a strong prior relationship (`strength > 0.7`)
/// multiplies the combined score by 1.1, capped at 1.0 (spec.md §4.2).
pub struct TrustFramework {
    weights: TrustWeights,
}

impl TrustFramework {
    pub fn new(weights: TrustWeights) -> Self {
        debug_assert!(weights.is_valid(), "trust weights must sum to 1.0 +/- 1e-2");
        Self { weights }
    }

    pub fn evaluate(
        &self,
        requester: &PartyContext,
        counterparty: Option<&PartyContext>,
        amount_minor: i64,
        operation: &str,
        relationship_strength: Option<f64>,
        velocity: &VelocityGovernor,
        now: DateTime<Utc>,
    ) -> TrustEvaluation {
        let mut warnings = Vec::new();

        // KYA gate: the required level is a function of amount (spec.md §4.2), checked
        // ahead of any scoring work.
        let required_kya = KyaLevel::required_for_amount_minor(amount_minor);
        if !requester.kya_level.meets(required_kya) {
            return TrustEvaluation {
                approved: false,
                trust_score: 0.0,
                requester_tier: TrustTier::Untrusted,
                counterparty_tier: None,
                denial_reason: Some("kya_level_insufficient".to_string()),
                warnings,
            };
        }

        // Velocity gate, independent of and ahead of scoring (spec.md §4.2, §5).
        if let Err(err) = velocity.check(&requester.agent_id, now) {
            return TrustEvaluation {
                approved: false,
                trust_score: 0.0,
                requester_tier: TrustTier::Untrusted,
                counterparty_tier: None,
                denial_reason: Some(err.code().to_string()),
                warnings,
            };
        }

        let requester_score = compute_trust_score(&requester.signals, &self.weights);
        let counterparty_score = counterparty.map(|c| compute_trust_score(&c.signals, &self.weights));

        let combined_raw = match counterparty_score {
            Some(c) => geometric_mean(requester_score.score, c.score),
            None => requester_score.score,
        };
        let combined = match relationship_strength {
            Some(strength) if strength > 0.7 => (combined_raw * 1.1).min(1.0),
            _ => combined_raw,
        };
        let combined_tier = TrustTier::from_score(combined);

        let amount_exceeds_tier_limit = amount_minor > combined_tier.limits().max_per_tx_minor;
        if amount_exceeds_tier_limit {
            warnings.push("amount_exceeds_tier_limit".to_string());
        }

        let sanctions_hit = requester.sanctions_hit || counterparty.map(|c| c.sanctions_hit).unwrap_or(false);
        let mut drift_alerts = requester.drift_alerts.clone();
        if let Some(c) = counterparty {
            drift_alerts.extend(c.drift_alerts.iter().cloned());
        }
        let risk_inputs = RiskInputs {
            sanctions_hit,
            amount_exceeds_tier_limit,
            is_first_transaction_with_counterparty: counterparty.is_some() && relationship_strength.unwrap_or(0.0) == 0.0,
            active_drift_alerts: drift_alerts,
        };
        let risk = assess_risk(&TrustScore { score: combined, tier: combined_tier }, &risk_inputs);

        let denial_reason = match risk.action {
            RiskAction::Block => Some(if sanctions_hit { "sanctions_block".to_string() } else { "policy_violation".to_string() }),
            RiskAction::Escalate => Some("requires_escalation".to_string()),
            _ => None,
        };
        if matches!(risk.action, RiskAction::Review | RiskAction::EnhancedDueDiligence) {
            warnings.extend(risk.reasons.clone());
        }

        TrustEvaluation {
            approved: denial_reason.is_none(),
            trust_score: combined,
            requester_tier: TrustTier::from_score(requester_score.score),
            counterparty_tier: counterparty_score.map(|c| c.tier),
            denial_reason,
            warnings,
        }
    }
}

/// `operation` is currently informational only (logged/attached to warnings by callers);
/// every operation kind runs the same evaluation ladder.
pub fn geometric_mean(a: f64, b: f64) -> f64 {
    (a.max(0.0) * b.max(0.0)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::scorer::{ComplianceSignal, TransactionHistorySignal};

    fn good_party() -> PartyContext {
        let mut p = PartyContext::new(AgentId::new(), KyaLevel::Attested);
        p.signals = TrustSignals {
            kya_level_score: 1.0,
            transaction_history: TransactionHistorySignal {
                success_count: 500,
                failure_count: 2,
                total_volume_minor: 1_000_000_000,
                distinct_merchants: 40,
                account_age_days: 400,
                dispute_count: 0,
            },
            compliance: ComplianceSignal::default(),
            ..Default::default()
        };
        p
    }

    #[test]
    fn insufficient_kya_denies_before_scoring() {
        let framework = TrustFramework::new(TrustWeights::default());
        let requester = PartyContext::new(AgentId::new(), KyaLevel::None);
        let velocity = VelocityGovernor::new();
        let result = framework.evaluate(&requester, None, 500_000, "payment", None, &velocity, Utc::now());
        assert!(!result.approved);
        assert_eq!(result.denial_reason.as_deref(), Some("kya_level_insufficient"));
    }

    #[test]
    fn sanctions_hit_always_blocks() {
        let framework = TrustFramework::new(TrustWeights::default());
        let mut requester = good_party();
        requester.sanctions_hit = true;
        let velocity = VelocityGovernor::new();
        let result = framework.evaluate(&requester, None, 1_000, "payment", None, &velocity, Utc::now());
        assert!(!result.approved);
        assert_eq!(result.denial_reason.as_deref(), Some("sanctions_block"));
    }

    #[test]
    fn strong_relationship_boosts_combined_score() {
        let framework = TrustFramework::new(TrustWeights::default());
        let requester = good_party();
        let counterparty = good_party();
        let velocity = VelocityGovernor::new();
        let without_relationship = framework.evaluate(&requester, Some(&counterparty), 1_000, "a2a_transfer", None, &velocity, Utc::now());
        let velocity2 = VelocityGovernor::new();
        let with_relationship = framework.evaluate(&requester, Some(&counterparty), 1_000, "a2a_transfer", Some(0.9), &velocity2, Utc::now());
        assert!(with_relationship.trust_score >= without_relationship.trust_score);
    }

    #[test]
    fn velocity_exceeded_denies_with_rate_limit_reason() {
        let framework = TrustFramework::new(TrustWeights::default());
        let requester = good_party();
        let windows = crate::ratelimit::WindowSet {
            minute: crate::ratelimit::WindowLimit::new(chrono::Duration::minutes(1), 1),
            hour: crate::ratelimit::WindowLimit::new(chrono::Duration::hours(1), 100),
            day: crate::ratelimit::WindowLimit::new(chrono::Duration::days(1), 500),
        };
        let velocity = VelocityGovernor::with_windows(windows);
        let now = Utc::now();
        assert!(framework.evaluate(&requester, None, 100, "payment", None, &velocity, now).approved);
        let result = framework.evaluate(&requester, None, 100, "payment", None, &velocity, now);
        assert!(!result.approved);
        assert_eq!(result.denial_reason.as_deref(), Some("rate_limit_minute"));
    }
}
