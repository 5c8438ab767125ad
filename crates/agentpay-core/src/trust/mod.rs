//! Trust framework (spec.md §4.2): KYA state, behavioural scorer, drift detector, and
//! velocity governor, composed by the payment orchestrator's `evaluate_trust` call.

pub mod drift;
pub mod framework;
pub mod kya;
pub mod risk;
pub mod scorer;
pub mod velocity;

pub use drift::{detect_amount_drift, detect_categorical_drift, AmountSummary, DriftAlert, DriftSeverity, DriftType, SpendingProfile};
pub use framework::{geometric_mean, PartyContext, TrustEvaluation, TrustFramework};
pub use kya::{CodeAttestation, KyaEntry, KyaLevel};
pub use risk::{assess_risk, RiskAction, RiskAssessment, RiskInputs};
pub use scorer::{compute_trust_score, kya_level_score, TrustScore, TrustScoreCache, TrustSignals, TrustTier, TrustWeights};
pub use velocity::VelocityGovernor;
