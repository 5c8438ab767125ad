//! Know-Your-Agent (KYA) levels and guarded level transitions (spec.md §3, §4.2).

use crate::error::{AgentPayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KyaLevel {
    None,
    Basic,
    Verified,
    Attested,
}

impl KyaLevel {
    /// Required level as a function of transaction amount (spec.md §4.2): `≤ $10 BASIC,
    /// ≤ $1,000 VERIFIED, > $1,000 ATTESTED`.
    pub fn required_for_amount_minor(amount_minor: i64) -> KyaLevel {
        if amount_minor <= 1_000 {
            KyaLevel::Basic
        } else if amount_minor <= 100_000 {
            KyaLevel::Verified
        } else {
            KyaLevel::Attested
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KyaLevel::None => 0,
            KyaLevel::Basic => 1,
            KyaLevel::Verified => 2,
            KyaLevel::Attested => 3,
        }
    }

    pub fn meets(&self, required: KyaLevel) -> bool {
        self.rank() >= required.rank()
    }
}

#[derive(Debug, Clone)]
pub struct CodeAttestation {
    pub code_hash: String,
    pub expected_code_hash: String,
}

impl CodeAttestation {
    pub fn is_valid(&self) -> bool {
        !self.code_hash.is_empty() && self.code_hash == self.expected_code_hash
    }
}

/// Request to transition an agent's KYA level. Transitions are guarded per spec.md §4.2:
/// VERIFIED requires an anchor-verification id (owner KYC); ATTESTED additionally requires
/// a valid `CodeAttestation` and a current trust score ≥ 0.7. Downgrades step exactly one
/// level; revocation forces NONE.
pub fn transition(
    current: KyaLevel,
    target: KyaLevel,
    owner_kyc_verification_id: Option<&str>,
    code_attestation: Option<&CodeAttestation>,
    current_trust_score: f64,
) -> Result<KyaLevel> {
    if target == current {
        return Ok(current);
    }

    if target > current {
        match target {
            KyaLevel::Verified => {
                if owner_kyc_verification_id.map(|s| !s.is_empty()).unwrap_or(false) {
                    Ok(KyaLevel::Verified)
                } else {
                    Err(AgentPayError::policy("kya_level_insufficient", "VERIFIED requires an owner KYC verification id"))
                }
            }
            KyaLevel::Attested => {
                let attestation_ok = code_attestation.map(|a| a.is_valid()).unwrap_or(false);
                if attestation_ok && current_trust_score >= 0.7 {
                    Ok(KyaLevel::Attested)
                } else {
                    Err(AgentPayError::policy(
                        "kya_level_insufficient",
                        "ATTESTED requires a valid code attestation and trust score >= 0.7",
                    ))
                }
            }
            KyaLevel::Basic => Ok(KyaLevel::Basic),
            KyaLevel::None => unreachable!("target > current but target is None"),
        }
    } else {
        // Downgrade: step exactly one level per call.
        let stepped = match current {
            KyaLevel::Attested => KyaLevel::Verified,
            KyaLevel::Verified => KyaLevel::Basic,
            KyaLevel::Basic => KyaLevel::None,
            KyaLevel::None => KyaLevel::None,
        };
        Ok(stepped)
    }
}

/// Revocation always forces NONE regardless of current level, and the caller must
/// terminate the agent's liveness tracking (spec.md §4.2) — that side effect lives in the
/// velocity governor, not here.
pub fn revoke() -> KyaLevel {
    KyaLevel::None
}

#[derive(Debug, Clone)]
pub struct KyaEntry {
    pub level: KyaLevel,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_amount_requires_next_level() {
        assert_eq!(KyaLevel::required_for_amount_minor(1_000), KyaLevel::Basic);
        assert_eq!(KyaLevel::required_for_amount_minor(1_001), KyaLevel::Verified);
        assert_eq!(KyaLevel::required_for_amount_minor(100_000), KyaLevel::Verified);
        assert_eq!(KyaLevel::required_for_amount_minor(100_001), KyaLevel::Attested);
    }

    #[test]
    fn verified_requires_kyc_id() {
        assert!(transition(KyaLevel::Basic, KyaLevel::Verified, None, None, 0.5).is_err());
        assert!(transition(KyaLevel::Basic, KyaLevel::Verified, Some("kyc_123"), None, 0.5).is_ok());
    }

    #[test]
    fn attested_requires_attestation_and_score() {
        let attestation = CodeAttestation { code_hash: "abc".into(), expected_code_hash: "abc".into() };
        assert!(transition(KyaLevel::Verified, KyaLevel::Attested, None, Some(&attestation), 0.5).is_err());
        assert!(transition(KyaLevel::Verified, KyaLevel::Attested, None, Some(&attestation), 0.7).is_ok());
    }

    #[test]
    fn downgrade_steps_one_level() {
        assert_eq!(transition(KyaLevel::Attested, KyaLevel::None, None, None, 0.0).unwrap(), KyaLevel::Verified);
    }

    #[test]
    fn revocation_forces_none() {
        assert_eq!(revoke(), KyaLevel::None);
    }
}
